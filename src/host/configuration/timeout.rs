//! Wall-clock bounds.

use crate::common::error::{inv_cfg, Error};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    /// A number (integers or decimals) with an optional unit suffix.
    static ref TIMEOUT_RE: Regex = Regex::new(r"^([0-9]+(?:\.[0-9]+)?)(ms|s|m|h)?$").unwrap();
}

/// A wall-clock bound that may be absent.
///
/// Used for the plan deadline and the SIGTERM grace period. The string form
/// accepted on the command line is a single number with an optional unit
/// (`30`, `2.5s`, `250ms`, `5m`, `1h`; bare numbers are seconds), or `none`
/// for no bound at all.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    /// No bound.
    pub fn none() -> Timeout {
        Timeout(None)
    }

    /// A bound of the given duration.
    pub fn after(duration: Duration) -> Timeout {
        Timeout(Some(duration))
    }

    /// A bound in whole seconds.
    pub fn from_secs(seconds: u64) -> Timeout {
        Timeout::after(Duration::from_secs(seconds))
    }

    /// A bound in whole milliseconds.
    pub fn from_millis(millis: u64) -> Timeout {
        Timeout::after(Duration::from_millis(millis))
    }

    /// Returns the bound, or `None` when unbounded.
    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }
}

impl FromStr for Timeout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "none" || lowered == "infinite" || lowered == "off" {
            return Ok(Timeout::none());
        }
        let captures = match TIMEOUT_RE.captures(&lowered) {
            Some(captures) => captures,
            None => {
                return inv_cfg(format!(
                    "'{}' is not a timeout; expected a number with an optional \
                     ms/s/m/h unit, or 'none'",
                    s
                ));
            }
        };
        let number: f64 = captures
            .get(1)
            .unwrap()
            .as_str()
            .parse()
            .map_err(|_| -> Error {
                crate::common::error::ErrorKind::InvalidConfigValue(format!(
                    "timeout value '{}' is out of range",
                    s
                ))
                .into()
            })?;
        if !number.is_finite() || number > 1e15 {
            return inv_cfg(format!("timeout value '{}' is out of range", s));
        }
        // Unit scaling happens in Duration arithmetic, which is exact per
        // nanosecond; only the number itself goes through floating point.
        let base = Duration::from_secs_f64(number);
        let duration = match captures.get(2).map(|m| m.as_str()) {
            Some("ms") => base / 1000,
            Some("m") => base * 60,
            Some("h") => base * 3600,
            _ => base,
        };
        Ok(Timeout::after(duration))
    }
}

impl fmt::Display for Timeout {
    /// Renders in the same grammar `from_str` accepts: sub-second bounds in
    /// milliseconds, everything else in seconds.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            None => write!(f, "none"),
            Some(duration) => {
                if duration.subsec_nanos() != 0 {
                    write!(f, "{}ms", duration.as_millis())
                } else {
                    write!(f, "{}s", duration.as_secs())
                }
            }
        }
    }
}
