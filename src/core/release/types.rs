//! Data carried through a release run.

use serde::Serialize;

/// Whether the final deploy actually talks to EB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Deploy,
    /// Everything runs except the deploy itself, which is replaced by a
    /// short artificial delay.
    Simulate,
}

#[derive(Debug, Clone)]
pub struct ReleaseOptions {
    /// Environment name requested on the command line, if any.
    pub environment: Option<String>,
    /// Explicit config file path (tilde-expanded), overriding discovery.
    pub config_file: Option<String>,
    /// Skip tasks, manifest edits and branch publish; just deploy.
    pub deploy_only: bool,
    pub mode: DeployMode,
    /// Log each stage's detail, not just milestones.
    pub verbose: bool,
    pub performance: bool,
}

/// Mutable bookkeeping for what must be undone during restore.
///
/// Fields are written exactly when the corresponding side effect lands,
/// so restore can read them without re-deriving repository state.
#[derive(Debug, Default)]
pub struct ReleaseState {
    /// Branch to return to when the run ends.
    pub starting_branch: Option<String>,
    /// Release branch actually created or reused this run.
    pub release_branch: Option<String>,
    /// Whether the pre-task stash was made and must be popped.
    pub did_stash: bool,
    /// Whether the publish path's transfer stash is still on the stack.
    /// Cleared when merge-stash consumes it; a live entry here sits on
    /// top of the pre-task stash and must be dropped before the pop.
    pub transfer_stash: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    /// The pipeline reached the end but the deploy itself failed.
    SuccessWithErrors,
    /// The user declined a prompt; nothing left to do.
    UserAborted,
}

impl RunResult {
    pub fn exit_code(self) -> i32 {
        match self {
            RunResult::Success | RunResult::UserAborted => 0,
            RunResult::SuccessWithErrors => 1,
        }
    }
}

/// Outcome summary returned to the command layer.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub result: RunResult,
    /// Selected environment; absent when the run aborted before selection.
    pub environment: Option<String>,
    pub tasks_run: usize,
    pub deploy_only: bool,
    pub simulated: bool,
}
