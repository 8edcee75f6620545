//! The log thread implementation.

use crate::{
    common::{
        error::Result,
        log::{
            deinit, init,
            proxy::LogProxy,
            tee_file::{TeeFile, TeeFileConfiguration},
            Log, LogRecord, Loglevel, LoglevelFilter, PID,
        },
    },
    trace,
};
use std::{io::Write, thread};
use term::stderr;

/// The dedicated logging thread.
///
/// All log records funnel into this thread over a crossbeam channel; it
/// writes them to standard error (colored when the terminal supports it)
/// and to any configured tee files. Spawning the thread also registers a
/// [`LogProxy`] for the calling thread.
///
/// [`LogProxy`]: ../proxy/struct.LogProxy.html
#[derive(Debug)]
pub struct LogThread {
    sender: Option<crossbeam_channel::Sender<LogRecord>>,
    handler: Option<thread::JoinHandle<Result<()>>>,
}

impl LogThread {
    /// Starts a new log thread.
    ///
    /// `proxy_level` filters the records forwarded by the calling thread's
    /// proxy; `stderr_level` filters what the log thread itself writes to
    /// standard error. Tee files carry their own filters.
    pub fn spawn(
        name: impl Into<String>,
        proxy_level: LoglevelFilter,
        stderr_level: LoglevelFilter,
        tee_files: Vec<TeeFileConfiguration>,
    ) -> Result<LogThread> {
        // Create the log channel.
        let (sender, receiver): (_, crossbeam_channel::Receiver<LogRecord>) =
            crossbeam_channel::unbounded();

        // Spawn the log thread.
        let handler = thread::spawn(move || {
            let mut t = if stderr_level > LoglevelFilter::Off {
                // This may return None, which disables stderr output.
                stderr()
            } else {
                None
            };

            let supports_dim = t.is_some() && t.as_ref().unwrap().supports_attr(term::Attr::Dim);
            let supports_colors = t.is_some()
                && t.as_ref()
                    .unwrap()
                    .supports_attr(term::Attr::ForegroundColor(9));

            let trace = t.is_some() && stderr_level >= LoglevelFilter::Trace;

            let tee_files: Vec<TeeFile> = tee_files
                .into_iter()
                .map(TeeFile::new)
                .collect::<Result<Vec<_>>>()?;

            while let Ok(record) = receiver.recv() {
                let level = LoglevelFilter::from(record.level());

                // Tee files
                tee_files
                    .iter()
                    .filter(|tf| tf.enabled(record.level()))
                    .for_each(|tf| tf.log(&record));

                // Standard error
                if t.is_some() && level <= stderr_level {
                    let t = t.as_mut().unwrap();
                    let color: term::color::Color = record.level().into();

                    // Timestamp
                    t.reset()?;
                    if supports_dim {
                        t.attr(term::Attr::Dim)?;
                    }
                    write!(
                        t,
                        "{} ",
                        humantime::format_rfc3339_seconds(record.timestamp()),
                    )?;
                    t.reset()?;

                    // Record level
                    if supports_colors {
                        t.fg(color)?;
                    }
                    write!(t, "{:>5} ", format!("{}", record.level()))?;
                    t.reset()?;

                    // Identifier. Stage stderr proxies log under the stage
                    // name; a foreign pid means the line came from a child.
                    if supports_colors && *PID != record.process() {
                        t.fg(record.process() % 7 + 1)?;
                    }
                    if supports_dim {
                        t.attr(term::Attr::Dim)?;
                    }
                    if trace {
                        write!(
                            t,
                            "{:<24} ",
                            format!(
                                "{:>5}:{:<2} {}",
                                record.process(),
                                record.thread(),
                                record.logger(),
                            )
                        )?;
                    } else {
                        write!(t, "{:<16} ", record.logger())?;
                    }
                    t.reset()?;

                    // Payload
                    if supports_colors && record.level() == Loglevel::Trace {
                        t.fg(color)?;
                    }
                    writeln!(t, "{}", record.payload())?;
                    t.reset()?;
                }
            }
            if let Some(mut term) = t {
                term.reset()?;
            }
            Ok(())
        });

        // Start a LogProxy for the current thread.
        init(vec![LogProxy::boxed(name, proxy_level, sender.clone())])?;
        trace!("LogThread started");

        Ok(LogThread {
            sender: Some(sender),
            handler: Some(handler),
        })
    }

    /// Returns a copy of the sender side of the log channel, for handing to
    /// proxies in other threads.
    pub fn get_sender(&self) -> crossbeam_channel::Sender<LogRecord> {
        self.sender.clone().unwrap()
    }
}

/// Drops the sender side of the log channel and waits for the log thread to
/// finish draining.
impl Drop for LogThread {
    fn drop(&mut self) {
        trace!("Dropping LogThread");

        // Disconnect the LogProxy running in the main thread.
        let _ = deinit();

        // Drop the owned sender side to disconnect the log channel.
        self.sender = None;

        // Wait for the log thread to go down.
        self.handler
            .take()
            .expect("LogThread failed to start")
            .join()
            .expect("LogThread failed to terminate")
            .expect("LogThread failed");
    }
}
