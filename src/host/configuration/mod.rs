//! Configuration structures for the executor and for individual stages.

mod env_mod;
mod executor;
mod stream_capture_mode;
mod timeout;

pub use env_mod::EnvMod;
pub use executor::ExecutorConfiguration;
pub use stream_capture_mode::StreamCaptureMode;
pub use timeout::Timeout;
