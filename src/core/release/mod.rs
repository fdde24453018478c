pub mod pipeline;
pub mod types;

pub use pipeline::ReleasePipeline;
pub use types::{DeployMode, ReleaseOptions, ReleaseState, RunReport, RunResult};
