use crate::common::{
    error::{Error, ErrorKind},
    log::Loglevel,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Stream capture mode.
///
/// Specifies how a stage's stderr stream should be connected.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum StreamCaptureMode {
    /// Don't capture the stream. That is, let it pass through to the
    /// orchestrator's stderr stream unchecked.
    Pass,

    /// Disable the stream by piping it to /dev/null.
    Null,

    /// Capture the stream to turn each line into a log record with the
    /// specified level, retaining a bounded tail for failure reports.
    Capture(Loglevel),
}

impl FromStr for StreamCaptureMode {
    type Err = Error;

    /// Parses a capture mode: `pass`, `null`, or any loglevel name, which
    /// selects `Capture` at that level.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(StreamCaptureMode::Pass),
            "null" => Ok(StreamCaptureMode::Null),
            level => Loglevel::from_str(level)
                .map(StreamCaptureMode::Capture)
                .map_err(|_| {
                    ErrorKind::InvalidConfigValue(format!(
                        "{} is not a valid stream capture mode, valid values are \
                         pass, null, or a loglevel",
                        s
                    ))
                    .into()
                }),
        }
    }
}

impl ::std::fmt::Display for StreamCaptureMode {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match self {
            StreamCaptureMode::Pass => write!(f, "pass"),
            StreamCaptureMode::Null => write!(f, "null"),
            StreamCaptureMode::Capture(level) => write!(f, "{}", level),
        }
    }
}
