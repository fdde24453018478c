pub mod config;
pub mod eb;
pub mod error;
pub mod git;
pub mod package;
pub mod perf;
pub mod prompt;
pub mod release;
pub mod task;

pub use error::{Error, ErrorCode, Result};
