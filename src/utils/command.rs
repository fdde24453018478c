//! Command execution primitives with per-call timeouts.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

/// Captured result of one external command invocation.
///
/// A timeout, a non-zero exit and a spawn failure all collapse to
/// `success: false`; callers never see the distinction and must treat
/// every failure as an ordinary outcome.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn failure() -> Self {
        Self::default()
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Options for one command invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the child when this elapses. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Extra environment variables merged into the child's environment.
    pub env: Option<HashMap<String, String>>,
    /// Working directory for the child. `None` inherits the process cwd.
    pub cwd: Option<PathBuf>,
}

impl RunOptions {
    pub fn timeout_ms(ms: u64) -> Self {
        Self {
            timeout: Some(Duration::from_millis(ms)),
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }
}

/// External process execution boundary.
///
/// Gateways never spawn processes directly; they go through this trait so
/// tests can substitute a scripted runner.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> RunOutput;
}

/// Runs commands against the real system, killing the child on timeout.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> RunOutput {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &options.cwd {
            command.current_dir(dir);
        }
        if let Some(env) = &options.env {
            command.envs(env);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(_) => return RunOutput::failure(),
        };

        // Drain pipes on background threads so a chatty child never blocks
        // on a full pipe buffer while we wait on it.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match options.timeout {
            Some(timeout) => match child.wait_timeout(timeout) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return RunOutput::failure();
                }
                Err(_) => return RunOutput::failure(),
            },
            None => match child.wait() {
                Ok(status) => status,
                Err(_) => return RunOutput::failure(),
            },
        };

        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_reader).unwrap_or_default();

        RunOutput {
            success: status.success(),
            stdout,
            stderr,
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = source.read_to_string(&mut buf);
        buf
    })
}

fn join_reader(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Extract error text from a run, preferring stderr over stdout.
pub fn error_text(output: &RunOutput) -> String {
    if !output.stderr.trim().is_empty() {
        output.stderr.trim().to_string()
    } else {
        output.stdout.trim().to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout_on_success() {
        let output = SystemRunner.run("echo", &["hello"], &RunOptions::default());
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn run_reports_failure_for_missing_program() {
        let output = SystemRunner.run("nonexistent_command_xyz", &[], &RunOptions::default());
        assert!(!output.success);
    }

    #[test]
    fn run_reports_failure_for_nonzero_exit() {
        let output = SystemRunner.run("sh", &["-c", "exit 3"], &RunOptions::default());
        assert!(!output.success);
    }

    #[test]
    fn run_kills_child_on_timeout() {
        let started = std::time::Instant::now();
        let output = SystemRunner.run("sleep", &["5"], &RunOptions::timeout_ms(100));
        assert!(!output.success);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn run_merges_injected_environment() {
        let mut env = HashMap::new();
        env.insert("EBR_TEST_VAR".to_string(), "injected".to_string());
        let output = SystemRunner.run(
            "sh",
            &["-c", "printf '%s' \"$EBR_TEST_VAR\""],
            &RunOptions::default().with_env(env),
        );
        assert!(output.success);
        assert_eq!(output.stdout, "injected");
    }

    #[test]
    fn run_respects_working_directory() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let output = SystemRunner.run(
            "pwd",
            &[],
            &RunOptions::default().in_dir(dir.path()),
        );
        assert!(output.success);
        assert!(output.stdout.trim().ends_with(
            dir.path()
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
        ));
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = RunOutput {
            success: false,
            stdout: "stdout content".to_string(),
            stderr: "stderr content".to_string(),
        };
        assert_eq!(error_text(&output), "stderr content");
    }

    #[test]
    fn error_text_falls_back_to_stdout() {
        let output = RunOutput {
            success: false,
            stdout: "stdout content".to_string(),
            stderr: String::new(),
        };
        assert_eq!(error_text(&output), "stdout content");
    }
}
