mod opts;

pub use opts::*;
