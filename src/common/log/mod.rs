//! A log thread and thread-local log proxy combination.
//!
//! This module provides logging functionality to run a dedicated log thread
//! in combination with one or more thread-local log proxy instances. The log
//! thread is the sink for all log records: it writes them to standard error
//! (colored, when the terminal supports it) and to any configured tee files.
//! Data records produced by pipelines never pass through here; the log
//! system owns standard error, the pipeline owns standard output.
//!
//! # Usage
//!
//! Start by spawning a [`LogThread`] from the main thread. This registers a
//! [`LogProxy`] for the current thread as a side effect. Additional threads
//! (for example the stdio forwarders capturing stage stderr) get their own
//! proxy via [`init`]. Records are generated with the provided macros:
//! `fatal!`, `error!`, `warn!`, `note!`, `info!`, `debug!` and `trace!`.
//!
//! [`LogThread`]: ./thread/struct.LogThread.html
//! [`LogProxy`]: ./proxy/struct.LogProxy.html
//! [`init`]: ./fn.init.html

pub mod proxy;
pub mod stdio;
pub mod tee_file;
pub mod thread;

use crate::common::error::{ErrorKind, Result, ResultExt};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use strum_macros::{Display, EnumIter, EnumString};

/// The Log trait.
///
/// Implemented by everything that can consume a [`LogRecord`]: the channel
/// proxy, tee files, and test collectors.
///
/// [`LogRecord`]: ./struct.LogRecord.html
pub trait Log {
    /// Returns the name of this logger.
    fn name(&self) -> &str;
    /// Returns true if the provided loglevel is enabled.
    fn enabled(&self, level: Loglevel) -> bool;
    /// Log the incoming record.
    fn log(&self, record: &LogRecord);
}

thread_local! {
    /// The thread-local loggers.
    pub static LOGGERS: RefCell<Option<Vec<Box<dyn Log>>>> = RefCell::new(None);

    static TID_CELL: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    // Cache the process id.
    #[doc(hidden)]
    pub static ref PID: u32 = std::process::id();
}

/// Returns a small monotonic identifier for the current thread.
#[doc(hidden)]
pub fn tid() -> u64 {
    TID_CELL.with(|tid| *tid)
}

/// Loglevel for log records.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Serialize, Deserialize, EnumString, Display,
    EnumIter,
)]
pub enum Loglevel {
    /// Reporting a fatal error: the orchestrator got into a state it cannot
    /// recover from. Also reported to the API caller via Result::Err where
    /// applicable.
    #[strum(to_string = "Fatal", serialize = "fatal", serialize = "f")]
    Fatal = 1,

    /// Reporting or propagating a non-fatal error. Also reported to the API
    /// caller via Result::Err where applicable.
    #[strum(to_string = "Error", serialize = "error", serialize = "e")]
    Error,

    /// Something unexpected but recoverable happened, such as a plugin with
    /// unparseable metadata being skipped during discovery.
    #[strum(to_string = "Warn", serialize = "warn", serialize = "w")]
    Warn,

    /// Information specifically requested by the user, such as a captured
    /// stage stderr stream or a mode-fallback notice.
    #[strum(to_string = "Note", serialize = "note", serialize = "n")]
    Note,

    /// Information not specifically requested by the user, such as a stage
    /// starting up or shutting down.
    #[strum(to_string = "Info", serialize = "info", serialize = "i")]
    Info,

    /// Debugging information for users of the orchestrator.
    #[strum(to_string = "Debug", serialize = "debug", serialize = "d")]
    Debug,

    /// Debugging information for the orchestrator's own internals.
    #[strum(to_string = "Trace", serialize = "trace", serialize = "t")]
    Trace,
}

impl Into<term::color::Color> for Loglevel {
    fn into(self) -> term::color::Color {
        match self {
            Loglevel::Fatal => term::color::BRIGHT_RED,
            Loglevel::Error => term::color::RED,
            Loglevel::Warn => term::color::YELLOW,
            Loglevel::Note => term::color::WHITE,
            Loglevel::Info => term::color::BLUE,
            Loglevel::Debug => term::color::CYAN,
            Loglevel::Trace => term::color::BRIGHT_BLACK,
        }
    }
}

/// LoglevelFilter for implementors of the Log trait.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Serialize, Deserialize, EnumString, Display,
    EnumIter,
)]
pub enum LoglevelFilter {
    /// A level lower than all log levels.
    #[strum(to_string = "Off", serialize = "off", serialize = "o")]
    Off = 0,
    /// Corresponds to the `Fatal` log level.
    #[strum(to_string = "Fatal", serialize = "fatal", serialize = "f")]
    Fatal,
    /// Corresponds to the `Error` log level.
    #[strum(to_string = "Error", serialize = "error", serialize = "e")]
    Error,
    /// Corresponds to the `Warn` log level.
    #[strum(to_string = "Warn", serialize = "warn", serialize = "w")]
    Warn,
    /// Corresponds to the `Note` log level.
    #[strum(to_string = "Note", serialize = "note", serialize = "n")]
    Note,
    /// Corresponds to the `Info` log level.
    #[strum(to_string = "Info", serialize = "info", serialize = "i")]
    Info,
    /// Corresponds to the `Debug` log level.
    #[strum(to_string = "Debug", serialize = "debug", serialize = "d")]
    Debug,
    /// Corresponds to the `Trace` log level.
    #[strum(to_string = "Trace", serialize = "trace", serialize = "t")]
    Trace,
}

impl Loglevel {
    /// Attempt to convert a LoglevelFilter to a Loglevel.
    pub fn try_from(levelfilter: LoglevelFilter) -> std::result::Result<Loglevel, ()> {
        match levelfilter {
            LoglevelFilter::Fatal => Ok(Loglevel::Fatal),
            LoglevelFilter::Error => Ok(Loglevel::Error),
            LoglevelFilter::Warn => Ok(Loglevel::Warn),
            LoglevelFilter::Note => Ok(Loglevel::Note),
            LoglevelFilter::Info => Ok(Loglevel::Info),
            LoglevelFilter::Debug => Ok(Loglevel::Debug),
            LoglevelFilter::Trace => Ok(Loglevel::Trace),
            LoglevelFilter::Off => Err(()),
        }
    }
}

impl From<Loglevel> for LoglevelFilter {
    fn from(level: Loglevel) -> LoglevelFilter {
        match level {
            Loglevel::Fatal => LoglevelFilter::Fatal,
            Loglevel::Error => LoglevelFilter::Error,
            Loglevel::Warn => LoglevelFilter::Warn,
            Loglevel::Note => LoglevelFilter::Note,
            Loglevel::Info => LoglevelFilter::Info,
            Loglevel::Debug => LoglevelFilter::Debug,
            Loglevel::Trace => LoglevelFilter::Trace,
        }
    }
}

/// Log record metadata.
///
/// The log metadata attached to a [`LogRecord`].
///
/// [`LogRecord`]: ./struct.LogRecord.html
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    /// Loglevel of the log record.
    level: Loglevel,
    module_path: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    timestamp: std::time::SystemTime,
    process: u32,
    thread: u64,
}

/// A log record.
///
/// A log record consists of some metadata and a payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    payload: String,
    metadata: Metadata,
    logger: String,
}

impl LogRecord {
    pub fn payload(&self) -> &str {
        &self.payload
    }
    pub fn level(&self) -> Loglevel {
        self.metadata.level
    }
    pub fn module_path(&self) -> Option<&str> {
        self.metadata.module_path.as_ref().map(|s| s.as_str())
    }
    pub fn file(&self) -> Option<&str> {
        self.metadata.file.as_ref().map(|s| s.as_str())
    }
    pub fn line(&self) -> Option<u32> {
        self.metadata.line
    }
    pub fn timestamp(&self) -> std::time::SystemTime {
        self.metadata.timestamp
    }
    pub fn process(&self) -> u32 {
        self.metadata.process
    }
    pub fn thread(&self) -> u64 {
        self.metadata.thread
    }
    pub fn logger(&self) -> &str {
        self.logger.as_str()
    }
}

impl LogRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: impl Into<String>,
        payload: impl Into<String>,
        level: Loglevel,
        module_path: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        process: u32,
        thread: u64,
    ) -> LogRecord {
        LogRecord {
            payload: payload.into(),
            metadata: Metadata {
                level,
                module_path: Some(module_path.into()),
                file: Some(file.into()),
                line: Some(line),
                timestamp: std::time::SystemTime::now(),
                process,
                thread,
            },
            logger: logger.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ",
            humantime::format_rfc3339_seconds(self.metadata.timestamp)
        )?;
        write!(f, "{:>5} ", format!("{}", self.metadata.level))?;
        write!(
            f,
            "{:<20} ",
            format!(
                "{:>5}:{:<2} {}",
                self.metadata.process, self.metadata.thread, self.logger,
            )
        )?;
        write!(f, "{}", self.payload)
    }
}

/// Update the thread-local loggers.
fn update(loggers: Option<Vec<Box<dyn Log>>>) -> Result<()> {
    LOGGERS.with(|x| {
        let mut x = x.try_borrow_mut().context(ErrorKind::LogError(
            "Unable to update thread-local loggers".to_string(),
        ))?;
        *x = loggers;
        Ok(())
    })
}

/// Initialize the thread-local loggers.
pub fn init(loggers: Vec<Box<dyn Log>>) -> Result<()> {
    update(Some(loggers))
}

/// Deinitialize the thread-local loggers.
pub fn deinit() -> Result<()> {
    update(None)
}

#[macro_export]
macro_rules! log {
    (target: $target:expr, location: ($file:expr, $line:expr), $lvl:expr, $($arg:tt)+) => ({
        $crate::common::log::LOGGERS.try_with(|loggers| {
            if let Some(ref loggers) = *loggers.borrow() {
                loggers.iter().for_each(|logger| {
                    if logger.enabled($lvl) {
                        logger.log(&$crate::common::log::LogRecord::new(
                            logger.name(),
                            format!($($arg)+),
                            $lvl,
                            $target,
                            $file,
                            $line,
                            *$crate::common::log::PID,
                            $crate::common::log::tid(),
                        ));
                    }
                });
                true
            } else {
                false
            }
        }).unwrap_or(false)
    });
    (target: $target:expr, $lvl:expr, $($arg:tt)+) => (
        $crate::log!(
            target: $target,
            location: (file!(), line!()),
            $lvl, $($arg)+
        )
    );
    ($lvl:expr, $($arg:tt)+) => (
        $crate::log!(
            target: module_path!(),
            $lvl, $($arg)+
        )
    )
}

#[macro_export]
macro_rules! fatal {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Fatal, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Fatal, $($arg)+)
    )
}

#[macro_export]
macro_rules! error {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Error, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Error, $($arg)+)
    )
}

#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Warn, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Warn, $($arg)+)
    )
}

#[macro_export]
macro_rules! note {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Note, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Note, $($arg)+)
    )
}

#[macro_export]
macro_rules! info {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Info, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Info, $($arg)+)
    )
}

#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Debug, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Debug, $($arg)+)
    )
}

#[macro_export]
macro_rules! trace {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log!(target: $target, $crate::common::log::Loglevel::Trace, $($arg)+)
    );
    ($($arg:tt)+) => (
        $crate::log!($crate::common::log::Loglevel::Trace, $($arg)+)
    )
}

#[cfg(test)]
mod tests {
    use super::{LogRecord, Loglevel, LoglevelFilter};
    use std::str::FromStr;

    #[test]
    fn level_order() {
        assert!(Loglevel::Debug < Loglevel::Trace);
        assert!(Loglevel::Info < Loglevel::Debug);
        assert!(Loglevel::Note < Loglevel::Info);
        assert!(Loglevel::Warn < Loglevel::Note);
        assert!(Loglevel::Error < Loglevel::Warn);
        assert!(Loglevel::Fatal < Loglevel::Error);
        assert!(LoglevelFilter::Off < LoglevelFilter::from(Loglevel::Fatal));
    }

    #[test]
    fn level_from_str() {
        assert_eq!(Loglevel::from_str("warn").unwrap(), Loglevel::Warn);
        assert_eq!(Loglevel::from_str("w").unwrap(), Loglevel::Warn);
        assert_eq!(LoglevelFilter::from_str("off").unwrap(), LoglevelFilter::Off);
        assert_eq!(LoglevelFilter::from_str("t").unwrap(), LoglevelFilter::Trace);
        assert!(Loglevel::from_str("hello").is_err());
    }

    #[test]
    fn level_colors() {
        let color: term::color::Color = Loglevel::Error.into();
        assert_eq!(color, term::color::RED);

        let color: term::color::Color = Loglevel::Note.into();
        assert_eq!(color, term::color::WHITE);
    }

    #[test]
    fn filter_to_level() {
        assert!(Loglevel::try_from(LoglevelFilter::Fatal).is_ok());
        assert!(Loglevel::try_from(LoglevelFilter::Trace).is_ok());
        assert!(Loglevel::try_from(LoglevelFilter::Off).is_err());
    }

    #[test]
    fn log_record_getters() {
        let record = LogRecord::new("", "", Loglevel::Debug, "path", "file", 1234u32, 1u32, 1u64);
        assert_eq!(record.module_path(), Some("path"));
        assert_eq!(record.file(), Some("file"));
        assert_eq!(record.line(), Some(1234u32));
    }
}
