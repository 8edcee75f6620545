//! Error-handling.
//!
//! Types for error-handling in this crate, based on the [`failure`] crate.
//!
//! [`Error`] is the wrapper which implements [`Fail`] and contains the inner
//! [`ErrorKind`] and its [`Context`].
//!
//! [`failure`]: ../../../failure/index.html
//! [`Error`]: ./struct.Error.html
//! [`ErrorKind`]: ./enum.ErrorKind.html
//! [`Fail`]: ../../../failure/trait.Fail.html
//! [`Context`]: ../../../failure/struct.Context.html

use failure::{Backtrace, Context, Fail};
use std::{fmt, fmt::Display, result};

/// Internal [`Result`] type which uses the crate's [`Error`] type.
///
/// [`Error`]: ./struct.Error.html
pub type Result<T> = result::Result<T, Error>;

/// Re-export the [`ResultExt`] trait which adds the [`Context`] methods to
/// [`Result`].
///
/// [`ResultExt`]: ../../../failure/trait.ResultExt.html
pub use failure::ResultExt;

/// [`Error`] type for this crate.
///
/// Implements [`Fail`].
///
/// [`Error`]: ./struct.Error.html
/// [`Fail`]: ../../../failure/trait.Fail.html
#[derive(Debug)]
pub struct Error {
    /// [`Context`] which contains the [`ErrorKind`].
    ///
    /// [`Context`]: ../../../failure/struct.Context.html
    /// [`ErrorKind`]: ./enum.ErrorKind.html
    ctx: Context<ErrorKind>,
}

/// The error taxonomy of the orchestrator.
///
/// Parser and resolver errors surface synchronously, before any process is
/// spawned; executor errors carry the failing stage's captured stderr tail.
#[derive(Clone, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    /// Parsing an address failed at the syntactic level.
    #[fail(display = "Invalid address: {}", _0)]
    InvalidAddress(String),

    /// A parameter value could not be coerced to its expected type, or a
    /// template placeholder could not be substituted.
    #[fail(display = "Invalid configuration value: {}", _0)]
    InvalidConfigValue(String),

    /// No plugin matched a file address.
    #[fail(display = "No plugin recognizes the format of '{}'", _0)]
    UnknownFormat(String),

    /// No plugin claims the requested profile namespace.
    #[fail(display = "No plugin claims the profile namespace '{}'", _0)]
    UnknownProfile(String),

    /// A plugin was referenced by name but is not in the registry.
    #[fail(display = "Unknown plugin: {}", _0)]
    UnknownPlugin(String),

    /// A matching plugin exists but does not support the required mode, and
    /// no lower-priority plugin could take over.
    #[fail(display = "Plugin '{}' does not support mode '{}'", _0, _1)]
    ModeUnsupported(String, String),

    /// Plugin metadata was missing, malformed, or inconsistent.
    #[fail(display = "Plugin metadata error: {}", _0)]
    PluginMetadataError(String),

    /// The operating system refused to create a child process.
    #[fail(display = "Failed to spawn stage: {}", _0)]
    SpawnFailed(String),

    /// At least one stage exited non-zero. Carries the failing stage index,
    /// its exit code, and a one-line summary (including the stderr tail when
    /// available).
    #[fail(display = "Stage {} failed with exit code {}: {}", stage, code, summary)]
    PipelineFailure {
        stage: usize,
        code: i32,
        summary: String,
    },

    /// The executor aborted the plan because the wall-clock deadline passed.
    #[fail(display = "Pipeline timed out")]
    Timeout,

    /// The executor aborted the plan on user request.
    #[fail(display = "Pipeline cancelled")]
    Cancelled,

    /// LogError
    #[fail(display = "Log error: {}", _0)]
    LogError(String),

    /// For propagating std::io::Error errors.
    #[fail(display = "I/O error: {}", _0)]
    IoError(String, std::io::ErrorKind),

    /// For propagating term::Error errors.
    #[fail(display = "Terminal error: {}", _0)]
    TermError(String),

    /// For propagating crossbeam_channel errors.
    #[fail(display = "Inter-thread communication error: {}", _0)]
    ITCError(String),

    /// Invariant violation; should never occur in correct operation.
    #[fail(display = "Internal error: {}", _0)]
    InternalError(String),
}

impl ErrorKind {
    /// Returns the process exit code this error maps to at the CLI level.
    ///
    /// Stage failures surface the failing stage's own code; timeouts and
    /// cancellation use reserved values distinct from plugin exit codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::PipelineFailure { code, .. } => *code,
            ErrorKind::Timeout => 124,
            ErrorKind::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Shorthand for producing an InvalidAddress error.
pub fn inv_addr<T>(s: impl Into<String>) -> Result<T> {
    Err(ErrorKind::InvalidAddress(s.into()).into())
}

/// Shorthand for producing an InvalidConfigValue error.
pub fn inv_cfg<T>(s: impl Into<String>) -> Result<T> {
    Err(ErrorKind::InvalidConfigValue(s.into()).into())
}

/// Shorthand for producing a PluginMetadataError.
pub fn meta_err<T>(s: impl Into<String>) -> Result<T> {
    Err(ErrorKind::PluginMetadataError(s.into()).into())
}

/// Shorthand for producing a PluginMetadataError in an or_else function.
pub fn oe_meta_err(s: impl Into<String>) -> impl FnOnce() -> Error {
    move || ErrorKind::PluginMetadataError(s.into()).into()
}

/// Shorthand for producing a SpawnFailed error.
pub fn spawn_err<T>(s: impl Into<String>) -> Result<T> {
    Err(ErrorKind::SpawnFailed(s.into()).into())
}

/// Shorthand for producing a LogError.
pub fn log_err<T>(s: impl Into<String>) -> Result<T> {
    Err(ErrorKind::LogError(s.into()).into())
}

/// Shorthand for producing an internal error.
pub fn internal<T>(s: impl Into<String>) -> Result<T> {
    Err(ErrorKind::InternalError(s.into()).into())
}

/// internal() but for or_else() functions.
pub fn oe_internal(s: impl Into<String>) -> impl FnOnce() -> Error {
    move || ErrorKind::InternalError(s.into()).into()
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        self.ctx.get_context()
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.ctx.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.ctx.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.ctx.fmt(f)
    }
}

impl From<ErrorKind> for Error {
    fn from(ctx: ErrorKind) -> Error {
        Error {
            ctx: Context::new(ctx),
        }
    }
}

impl From<Context<String>> for Error {
    fn from(ctx: Context<String>) -> Error {
        Error {
            ctx: ctx.map(ErrorKind::InternalError),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(ctx: Context<ErrorKind>) -> Error {
        Error { ctx }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        let msg = error.to_string();
        Error {
            ctx: Context::new(ErrorKind::IoError(msg, error.kind())),
        }
    }
}

impl From<term::Error> for Error {
    fn from(error: term::Error) -> Error {
        Error {
            ctx: Context::new(ErrorKind::TermError(error.to_string())),
        }
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(error: crossbeam_channel::SendError<T>) -> Error {
        Error {
            ctx: Context::new(ErrorKind::ITCError(error.to_string())),
        }
    }
}

impl From<crossbeam_channel::RecvError> for Error {
    fn from(error: crossbeam_channel::RecvError) -> Error {
        Error {
            ctx: Context::new(ErrorKind::ITCError(error.to_string())),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error {
            ctx: Context::new(ErrorKind::PluginMetadataError(error.to_string())),
        }
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Error {
        Error {
            ctx: Context::new(ErrorKind::PluginMetadataError(error.to_string())),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(error: std::str::Utf8Error) -> Error {
        Error {
            ctx: Context::new(ErrorKind::InvalidAddress(error.to_string())),
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(error: std::string::FromUtf8Error) -> Error {
        Error {
            ctx: Context::new(ErrorKind::InvalidAddress(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e: Error = ErrorKind::UnknownFormat("data.xyz".to_string()).into();
        assert_eq!(
            e.to_string(),
            "No plugin recognizes the format of 'data.xyz'"
        );
        let e: Error = ErrorKind::ModeUnsupported("csv".to_string(), "write".to_string()).into();
        assert_eq!(e.to_string(), "Plugin 'csv' does not support mode 'write'");
    }

    #[test]
    fn exit_codes() {
        assert_eq!(
            ErrorKind::PipelineFailure {
                stage: 1,
                code: 42,
                summary: String::new(),
            }
            .exit_code(),
            42
        );
        assert_eq!(ErrorKind::Timeout.exit_code(), 124);
        assert_eq!(ErrorKind::Cancelled.exit_code(), 130);
        assert_eq!(
            ErrorKind::UnknownPlugin("x".to_string()).exit_code(),
            1
        );
    }

    #[test]
    fn io_error_kind_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        match e.kind() {
            ErrorKind::IoError(_, kind) => assert_eq!(*kind, std::io::ErrorKind::NotFound),
            _ => panic!("wrong kind"),
        }
    }
}
