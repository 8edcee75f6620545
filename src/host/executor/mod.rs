//! The pipeline executor.
//!
//! Consumes an [`ExecutionPlan`]: creates the connecting pipes, spawns each
//! stage as a child process with the right stdio ends, closes the parent's
//! copies immediately, and supervises the set to completion.
//!
//! Two properties follow from the close discipline and are load-bearing:
//! backpressure (a full pipe buffer stalls the producer inside the kernel,
//! the orchestrator never buffers data) and SIGPIPE propagation (when a
//! consumer exits, the next upstream write kills the producer, because no
//! stray parent-held write end keeps the pipe alive).
//!
//! [`ExecutionPlan`]: ../resolver/plan/struct.ExecutionPlan.html

pub mod pipe;
pub mod signal;
pub mod supervisor;

pub use supervisor::{Interruption, PlanOutcome, StageStatus};

use crate::{
    common::{
        error::{internal, ErrorKind, Result},
        log::{stdio::proxy_stdio, thread::LogThread},
    },
    debug, trace,
    host::{
        configuration::{ExecutorConfiguration, StreamCaptureMode},
        resolver::{ExecutionPlan, StdinSource, StdoutSink},
    },
};
use std::{
    fs::File,
    process::{Child, Command, Stdio},
};

/// Spawns and supervises a plan, returning the aggregated outcome.
///
/// The outcome's [`result`] applies the failure rules; `execute` itself only
/// fails when the plan cannot be started (spawn failure, unopenable file).
///
/// [`result`]: ./supervisor/struct.PlanOutcome.html#method.result
pub fn execute(
    plan: &ExecutionPlan,
    configuration: &ExecutorConfiguration,
    logger: &LogThread,
) -> Result<PlanOutcome> {
    let stages = plan.stages();
    debug!("executing plan: {}", plan);

    let mut children: Vec<Child> = Vec::with_capacity(stages.len());
    let mut proxies = Vec::with_capacity(stages.len());
    let mut names = Vec::with_capacity(stages.len());
    // The read end of the pipe feeding the next stage, held only between
    // two loop iterations.
    let mut upstream_read: Option<File> = None;
    let mut pgid: Option<i32> = None;

    for (index, stage) in stages.iter().enumerate() {
        let result = spawn_stage(
            stage,
            index,
            &mut upstream_read,
            pgid,
            configuration,
            logger,
        );
        let (child, proxy) = match result {
            Ok(spawned) => spawned,
            Err(e) => {
                // Tear down whatever is already running before reporting.
                let mut statuses = vec![None; children.len()];
                let _ = supervisor::terminate(
                    pgid,
                    &configuration.grace,
                    &names,
                    &mut children,
                    &mut statuses,
                );
                return Err(e);
            }
        };
        if pgid.is_none() {
            pgid = Some(child.id() as i32);
        }
        trace!("stage '{}' spawned as pid {}", stage.name, child.id());
        children.push(child);
        proxies.push(proxy);
        names.push(stage.name.clone());
    }

    supervisor::supervise(&names, children, proxies, configuration, pgid)
}

/// Builds and spawns one stage. The pipe write end for this stage and the
/// file handles opened here are moved into the `Command` and dropped with
/// it at return, which closes the parent's copies; `upstream_read` is
/// replaced by the read end of this stage's outgoing pipe, if any.
fn spawn_stage(
    stage: &crate::host::resolver::Stage,
    index: usize,
    upstream_read: &mut Option<File>,
    pgid: Option<i32>,
    configuration: &ExecutorConfiguration,
    logger: &LogThread,
) -> Result<(Child, Option<crate::common::log::stdio::StdioProxy>)> {
    let stdin: Stdio = match &stage.stdin_source {
        StdinSource::InheritedStdin => Stdio::inherit(),
        StdinSource::PreviousStage => match upstream_read.take() {
            Some(read_end) => Stdio::from(read_end),
            None => return internal(format!("stage {} expects a pipe that was never made", index)),
        },
        StdinSource::OpenFile(path) => Stdio::from(File::open(path)?),
        StdinSource::OpenUrl(url) => {
            return internal(format!(
                "URL stdin source '{}' should have resolved to a protocol stage",
                url
            ));
        }
    };

    let stdout: Stdio = match &stage.stdout_sink {
        StdoutSink::InheritedStdout => Stdio::inherit(),
        StdoutSink::NextStage => {
            let p = pipe::pipe()?;
            *upstream_read = Some(p.read);
            Stdio::from(p.write)
        }
        // File::create truncates and writes bytes as they come; raw stages
        // need nothing special on Unix.
        StdoutSink::OpenFile(path) => Stdio::from(File::create(path)?),
    };

    let argv = stage.argv();
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(stdin)
        .stdout(stdout)
        .current_dir(&stage.cwd);

    match &configuration.stderr_mode {
        StreamCaptureMode::Pass => {
            command.stderr(Stdio::inherit());
        }
        StreamCaptureMode::Null => {
            command.stderr(Stdio::null());
        }
        StreamCaptureMode::Capture(_) => {
            command.stderr(Stdio::piped());
        }
    }

    for env_mod in &stage.env {
        env_mod.apply(&mut command);
    }

    // The Rust runtime ignores SIGPIPE process-wide and children inherit
    // that disposition; restore the default so downstream termination can
    // cancel upstream stages. Also collect every stage into the first
    // child's process group for cancellation.
    let group = pgid.unwrap_or(0);
    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(move || {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            libc::setpgid(0, group);
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(|e| {
        ErrorKind::SpawnFailed(format!("{} ({})", argv[0], e))
    })?;

    let proxy = match &configuration.stderr_mode {
        StreamCaptureMode::Capture(level) => {
            let level = *level;
            child.stderr.take().map(|stderr| {
                proxy_stdio(
                    format!("{}::stderr", stage.name),
                    Box::new(stderr),
                    logger.get_sender(),
                    level,
                    configuration.stderr_tail,
                )
            })
        }
        _ => None,
    };

    Ok((child, proxy))
}
