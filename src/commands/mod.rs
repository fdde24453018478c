pub mod deploy;

/// Command handlers return their output plus the process exit code.
pub type CmdResult<T> = eb_release::Result<(T, i32)>;
