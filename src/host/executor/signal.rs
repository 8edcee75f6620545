//! Signal-to-channel forwarding for the supervision loop.

use crate::{common::error::Result, trace};
use lazy_static::lazy_static;
use signal_hook::iterator::Signals;
use std::{os::raw::c_int, thread};

/// Registers a signal hook for the given signals and forwards them into a
/// channel the supervision loop can poll alongside its children.
pub fn notify(signals: &[c_int]) -> Result<crossbeam_channel::Receiver<c_int>> {
    let (tx, rx) = crossbeam_channel::bounded(100);
    let signals = Signals::new(signals)?;
    thread::spawn(move || {
        for signal in signals.forever() {
            if tx.send(signal).is_err() {
                break;
            }
        }
    });
    trace!("Signal hook running");
    Ok(rx)
}

lazy_static! {
    // Registered once per process: the hook's self-pipe and thread live for
    // the process lifetime, so repeated plan executions hold no descriptors
    // of their own.
    static ref PIPELINE_SIGNALS: crossbeam_channel::Receiver<c_int> =
        notify(&[libc::SIGINT, libc::SIGTERM]).expect("failed to install signal hook");
}

/// The shared cancellation channel (SIGINT/SIGTERM). Drain it before use:
/// signals delivered between plans are stale.
pub fn pipeline_signals() -> crossbeam_channel::Receiver<c_int> {
    PIPELINE_SIGNALS.clone()
}
