//! Supervision of a spawned plan: the wait loop, cancellation, and exit
//! status aggregation.

use crate::{
    common::{
        error::{ErrorKind, Result},
        log::stdio::StdioProxy,
    },
    debug, info, warn,
    host::configuration::{ExecutorConfiguration, Timeout},
};
use std::{
    process::{Child, ExitStatus},
    time::{Duration, Instant},
};

/// How a plan's execution was cut short, if it was.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// The wall-clock deadline passed.
    Timeout,
    /// The user cancelled (SIGINT/SIGTERM to the orchestrator).
    Cancelled,
}

/// Final state of one stage.
#[derive(Debug, Clone)]
pub struct StageStatus {
    /// Stage instance name, for reports.
    pub name: String,

    /// Exit code, when the stage exited normally.
    pub exit_code: Option<i32>,

    /// Terminating signal, when it did not.
    pub signal: Option<i32>,

    /// The retained tail of the stage's captured stderr.
    pub stderr_tail: String,
}

impl StageStatus {
    fn from_status(name: &str, status: ExitStatus) -> StageStatus {
        use std::os::unix::process::ExitStatusExt;
        StageStatus {
            name: name.to_string(),
            exit_code: status.code(),
            signal: status.signal(),
            stderr_tail: String::new(),
        }
    }

    pub fn terminated_by_sigpipe(&self) -> bool {
        self.signal == Some(libc::SIGPIPE)
    }
}

/// Everything `execute` learned about a finished plan.
#[derive(Debug)]
pub struct PlanOutcome {
    pub stages: Vec<StageStatus>,
    pub interruption: Option<Interruption>,
}

impl PlanOutcome {
    /// Applies the exit status aggregation rules, in order:
    ///
    ///  1. interruption beats everything and maps to a reserved code;
    ///  2. among failing stages the earliest (lowest index) wins, surfacing
    ///     its own exit code;
    ///  3. SIGPIPE termination counts as success except on the final
    ///     stage, whose consumer is the user.
    pub fn result(&self) -> Result<()> {
        match self.interruption {
            Some(Interruption::Timeout) => return Err(ErrorKind::Timeout.into()),
            Some(Interruption::Cancelled) => return Err(ErrorKind::Cancelled.into()),
            None => {}
        }
        let last = self.stages.len() - 1;
        for (index, stage) in self.stages.iter().enumerate() {
            let code = match (stage.exit_code, stage.signal) {
                (Some(0), _) => continue,
                (Some(code), _) => code,
                (None, Some(signal)) => {
                    if signal == libc::SIGPIPE && index != last {
                        // The downstream stage intentionally closed the
                        // pipe; the producer dying of SIGPIPE is the
                        // cancellation mechanism working.
                        continue;
                    }
                    128 + signal
                }
                (None, None) => 128,
            };
            let mut summary = format!("stage '{}' failed", stage.name);
            if !stage.stderr_tail.is_empty() {
                let tail: Vec<&str> = stage.stderr_tail.trim_end().lines().rev().take(3).collect();
                let tail: Vec<&str> = tail.into_iter().rev().collect();
                summary = format!("{}: {}", summary, tail.join(" | "));
            }
            return Err(ErrorKind::PipelineFailure {
                stage: index,
                code,
                summary,
            }
            .into());
        }
        Ok(())
    }

    /// The process exit code the CLI reports for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.result() {
            Ok(()) => 0,
            Err(e) => e.kind().exit_code(),
        }
    }
}

/// Waits for every child, watching for user cancellation and the optional
/// deadline. A single polling loop serves all three concerns; children
/// suspend in their own pipe I/O, the parent only ever sleeps here.
pub(crate) fn supervise(
    names: &[String],
    mut children: Vec<Child>,
    proxies: Vec<Option<StdioProxy>>,
    configuration: &ExecutorConfiguration,
    pgid: Option<i32>,
) -> Result<PlanOutcome> {
    let signals = super::signal::pipeline_signals();
    while signals.try_recv().is_ok() {}
    let deadline = configuration
        .deadline
        .duration()
        .map(|d| Instant::now() + d);

    let mut statuses: Vec<Option<ExitStatus>> = vec![None; children.len()];
    let mut interruption = None;

    while statuses.iter().any(Option::is_none) {
        reap(names, &mut children, &mut statuses)?;
        if statuses.iter().all(Option::is_some) {
            break;
        }
        if let Ok(signal) = signals.try_recv() {
            warn!("received signal {}, terminating pipeline", signal);
            interruption = Some(Interruption::Cancelled);
            terminate(pgid, &configuration.grace, names, &mut children, &mut statuses)?;
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                warn!("pipeline deadline expired, terminating");
                interruption = Some(Interruption::Timeout);
                terminate(pgid, &configuration.grace, names, &mut children, &mut statuses)?;
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    // Collect the stderr tails; the proxy threads end at stream EOF, which
    // the children's exit has produced.
    let mut stages = Vec::with_capacity(children.len());
    for ((name, status), proxy) in names.iter().zip(statuses).zip(proxies) {
        let status = status.expect("all stages reaped");
        let mut stage = StageStatus::from_status(name, status);
        if let Some(proxy) = proxy {
            stage.stderr_tail = proxy.join();
        }
        stages.push(stage);
    }

    Ok(PlanOutcome {
        stages,
        interruption,
    })
}

/// One non-blocking sweep over the children, recording whoever exited.
fn reap(
    names: &[String],
    children: &mut [Child],
    statuses: &mut [Option<ExitStatus>],
) -> Result<()> {
    for (index, child) in children.iter_mut().enumerate() {
        if statuses[index].is_some() {
            continue;
        }
        if let Some(status) = child.try_wait()? {
            match status.code() {
                Some(0) => debug!("stage '{}' exited cleanly", names[index]),
                Some(code) => info!("stage '{}' exited with code {}", names[index], code),
                None => info!("stage '{}' terminated by signal", names[index]),
            };
            statuses[index] = Some(status);
        }
    }
    Ok(())
}

/// SIGTERM to the process group, a grace period, then SIGKILL. Also used
/// for teardown after a failed spawn.
pub(crate) fn terminate(
    pgid: Option<i32>,
    grace: &Timeout,
    names: &[String],
    children: &mut [Child],
    statuses: &mut [Option<ExitStatus>],
) -> Result<()> {
    if let Some(pgid) = pgid {
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
    }
    let grace = grace.duration().unwrap_or(Duration::from_secs(5));
    let deadline = Instant::now() + grace;
    loop {
        reap(names, children, statuses)?;
        if statuses.iter().all(Option::is_some) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if let Some(pgid) = pgid {
        warn!("grace period expired, killing process group {}", pgid);
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    for (index, child) in children.iter_mut().enumerate() {
        if statuses[index].is_none() {
            statuses[index] = Some(child.wait()?);
        }
    }
    Ok(())
}
