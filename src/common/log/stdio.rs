//! Forwarding of child process output streams into the log system.

use crate::{
    common::log::{init, proxy::LogProxy, LogRecord, Loglevel, LoglevelFilter},
    error, log, trace,
};
use crossbeam_channel::Sender;
use std::{
    collections::VecDeque,
    io::{BufRead, BufReader, Read},
    thread,
};

/// Default bound on the retained tail of a captured stream, in bytes.
pub const DEFAULT_TAIL_LIMIT: usize = 64 * 1024;

/// Handle to a stream forwarding thread started by [`proxy_stdio`].
///
/// Joining the handle returns the retained tail of the stream, which the
/// executor includes in failure reports.
///
/// [`proxy_stdio`]: ./fn.proxy_stdio.html
#[derive(Debug)]
pub struct StdioProxy {
    handle: thread::JoinHandle<Vec<u8>>,
}

impl StdioProxy {
    /// Waits for the stream to reach EOF and returns its retained tail,
    /// lossily decoded.
    pub fn join(self) -> String {
        match self.handle.join() {
            Ok(tail) => String::from_utf8_lossy(&tail).into_owned(),
            Err(_) => String::new(),
        }
    }
}

/// Forwards a readable stream to the log thread, line by line.
///
/// Spawns a thread which reads the stream until EOF, emits one log record
/// per line at the given level, and accumulates the final `tail_limit` bytes
/// of the stream. The thread registers its own [`LogProxy`] under the given
/// name, so records show up attributed to the stage that produced them.
///
/// [`LogProxy`]: ../proxy/struct.LogProxy.html
pub fn proxy_stdio(
    name: impl Into<String>,
    stream: Box<dyn Read + Send>,
    sender: Sender<LogRecord>,
    level: Loglevel,
    tail_limit: usize,
) -> StdioProxy {
    let name = name.into();
    let handle = thread::spawn(move || {
        if init(vec![LogProxy::boxed(
            &name,
            LoglevelFilter::Trace,
            sender,
        )])
        .is_err()
        {
            return Vec::new();
        }
        let mut tail: VecDeque<u8> = VecDeque::with_capacity(tail_limit.min(4096));
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    trace!("EOF: closing stdio forwarding channel");
                    break;
                }
                Ok(_) => {
                    for &byte in &line {
                        if tail.len() == tail_limit {
                            tail.pop_front();
                        }
                        tail.push_back(byte);
                    }
                    let text = String::from_utf8_lossy(&line);
                    log!(level, "{}", text.trim_end_matches('\n'));
                }
                Err(e) => {
                    error!("{}", e);
                    break;
                }
            }
        }
        tail.into_iter().collect()
    });
    StdioProxy { handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_is_bounded() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let data: Vec<u8> = (0..100)
            .map(|i| format!("line {}\n", i))
            .collect::<String>()
            .into_bytes();
        let proxy = proxy_stdio(
            "stage",
            Box::new(std::io::Cursor::new(data)),
            sender,
            Loglevel::Note,
            16,
        );
        let tail = proxy.join();
        assert!(tail.len() <= 16);
        assert!(tail.ends_with("line 99\n"));
        // One record per line was forwarded.
        assert_eq!(receiver.try_iter().count(), 100 + 1);
    }

    #[test]
    fn records_carry_stage_name() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let proxy = proxy_stdio(
            "csv::stderr",
            Box::new(std::io::Cursor::new(b"oops\n".to_vec())),
            sender,
            Loglevel::Note,
            DEFAULT_TAIL_LIMIT,
        );
        proxy.join();
        let record = receiver
            .try_iter()
            .find(|r| r.payload() == "oops")
            .expect("record");
        assert_eq!(record.logger(), "csv::stderr");
    }
}
