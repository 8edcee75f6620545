//! A log proxy forwarding records to the log thread over a channel.

use crate::common::log::{Log, LogRecord, Loglevel, LoglevelFilter};

/// A [`Log`] implementation which forwards log records to a [`LogThread`]
/// over a crossbeam channel.
///
/// [`Log`]: ../trait.Log.html
/// [`LogThread`]: ../thread/struct.LogThread.html
#[derive(Debug, Clone)]
pub struct LogProxy {
    name: String,
    level: LoglevelFilter,
    sender: crossbeam_channel::Sender<LogRecord>,
}

impl LogProxy {
    fn new(
        name: impl Into<String>,
        level: LoglevelFilter,
        sender: crossbeam_channel::Sender<LogRecord>,
    ) -> LogProxy {
        LogProxy {
            name: name.into(),
            level,
            sender,
        }
    }

    /// Returns a boxed LogProxy, ready to pass to [`init`].
    ///
    /// [`init`]: ../fn.init.html
    pub fn boxed(
        name: impl Into<String>,
        level: LoglevelFilter,
        sender: crossbeam_channel::Sender<LogRecord>,
    ) -> Box<LogProxy> {
        Box::new(LogProxy::new(name, level, sender))
    }
}

impl Log for LogProxy {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn enabled(&self, level: Loglevel) -> bool {
        LoglevelFilter::from(level) <= self.level
    }

    fn log(&self, record: &LogRecord) {
        // The log thread may already be gone during shutdown; records
        // generated at that point are dropped.
        let _ = self.sender.send(record.clone());
    }
}
