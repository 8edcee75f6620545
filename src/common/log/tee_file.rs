//! A logger which appends formatted records to a file.

use crate::common::{
    error::{Error, Result},
    log::{Log, LogRecord, Loglevel, LoglevelFilter},
};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    str::FromStr,
};

/// Configuration for a [`TeeFile`]: the level filter and the file to append
/// to.
///
/// [`TeeFile`]: ./struct.TeeFile.html
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TeeFileConfiguration {
    /// Log records up to and including this level are written.
    pub filter: LoglevelFilter,

    /// The file to append to.
    pub file: PathBuf,
}

impl TeeFileConfiguration {
    pub fn new(filter: LoglevelFilter, file: impl Into<PathBuf>) -> TeeFileConfiguration {
        TeeFileConfiguration {
            filter,
            file: file.into(),
        }
    }
}

impl FromStr for TeeFileConfiguration {
    type Err = Error;

    /// Constructs a TeeFileConfiguration from its string representation,
    /// `<level>:<path>`, for instance `debug:pipeline.log`.
    fn from_str(s: &str) -> Result<Self> {
        let mut splitter = s.splitn(2, ':');
        let filter = LoglevelFilter::from_str(splitter.next().unwrap())
            .map_err(|e| crate::common::error::ErrorKind::LogError(e.to_string()))?;
        match splitter.next() {
            Some(file) if !file.is_empty() => Ok(TeeFileConfiguration::new(filter, file)),
            _ => crate::common::error::log_err(format!(
                "expected a tee specification of the form <level>:<path>, not '{}'",
                s
            )),
        }
    }
}

impl ::std::fmt::Display for TeeFileConfiguration {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{}:{}", self.filter, self.file.display())
    }
}

/// A [`Log`] implementation which appends formatted records to a file.
///
/// [`Log`]: ../trait.Log.html
#[derive(Debug)]
pub struct TeeFile {
    configuration: TeeFileConfiguration,
    buffer: RefCell<File>,
}

impl TeeFile {
    /// Opens the configured file for appending, creating it when needed.
    pub fn new(configuration: TeeFileConfiguration) -> Result<TeeFile> {
        let buffer = RefCell::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&configuration.file)?,
        );
        Ok(TeeFile {
            configuration,
            buffer,
        })
    }
}

impl Log for TeeFile {
    fn name(&self) -> &str {
        "tee_file"
    }

    fn enabled(&self, level: Loglevel) -> bool {
        LoglevelFilter::from(level) <= self.configuration.filter
    }

    fn log(&self, record: &LogRecord) {
        // A failing tee write is not worth killing the log thread over.
        let _ = writeln!(self.buffer.borrow_mut(), "{}", record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str() {
        assert_eq!(
            TeeFileConfiguration::from_str("debug:/tmp/x.log").unwrap(),
            TeeFileConfiguration::new(LoglevelFilter::Debug, "/tmp/x.log"),
        );
        assert_eq!(
            TeeFileConfiguration::from_str("t:rel.log").unwrap(),
            TeeFileConfiguration::new(LoglevelFilter::Trace, "rel.log"),
        );
        assert!(TeeFileConfiguration::from_str("debug").is_err());
        assert!(TeeFileConfiguration::from_str("nope:/tmp/x.log").is_err());
    }

    #[test]
    fn to_str() {
        assert_eq!(
            TeeFileConfiguration::new(LoglevelFilter::Warn, "x.log").to_string(),
            "Warn:x.log",
        );
    }
}
