use crate::{
    common::log::Loglevel,
    host::configuration::{StreamCaptureMode, Timeout},
};
use serde::{Deserialize, Serialize};

/// Knobs for a single plan execution.
///
/// The defaults match the documented behavior: no deadline, a five second
/// SIGTERM grace period, captured stage stderr at Note level with a 64 KiB
/// tail, and at most 16 stages per plan.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutorConfiguration {
    /// Optional wall-clock deadline for the whole plan.
    pub deadline: Timeout,

    /// Grace period between SIGTERM and SIGKILL on cancellation, timeout,
    /// or teardown after a spawn failure.
    pub grace: Timeout,

    /// How stage stderr streams are connected.
    pub stderr_mode: StreamCaptureMode,

    /// Bound on the retained stderr tail per stage, in bytes.
    pub stderr_tail: usize,

    /// Maximum number of stages per plan.
    pub max_stages: usize,
}

impl Default for ExecutorConfiguration {
    fn default() -> ExecutorConfiguration {
        ExecutorConfiguration {
            deadline: Timeout::none(),
            grace: Timeout::from_secs(5),
            stderr_mode: StreamCaptureMode::Capture(Loglevel::Note),
            stderr_tail: crate::common::log::stdio::DEFAULT_TAIL_LIMIT,
            max_stages: 16,
        }
    }
}
