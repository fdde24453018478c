//! Execution of user-declared release tasks.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::eb::EbGateway;
use crate::log_status;
use crate::utils::command::{error_text, CommandRunner, RunOptions};

/// Tasks that declare no timeout get one minute.
const DEFAULT_TASK_TIMEOUT_MS: u64 = 60_000;

/// One user-declared release task, as parsed from configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub command: String,
    /// Timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Append `--eb-env <name>` to the command before running.
    #[serde(default)]
    pub append_env_name: bool,
    #[serde(default, rename = "injectEBEnv")]
    pub inject_eb_env: InjectEbEnv,
}

/// Whether (and from which environment) to inject EB environment
/// variables into the task's process environment. `true` uses the
/// environment selected for the run; a string names another one.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InjectEbEnv {
    Enabled(bool),
    Named(String),
}

impl Default for InjectEbEnv {
    fn default() -> Self {
        InjectEbEnv::Enabled(false)
    }
}

impl InjectEbEnv {
    pub fn is_requested(&self) -> bool {
        !matches!(self, InjectEbEnv::Enabled(false))
    }

    pub fn target<'a>(&'a self, selected: &'a str) -> &'a str {
        match self {
            InjectEbEnv::Named(name) if !name.is_empty() => name,
            _ => selected,
        }
    }
}

impl Task {
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("Task #{}", index),
        }
    }
}

/// Run one task against the selected environment.
///
/// When env injection was requested and the fetch fails, the task does
/// not run at all; a task must never execute with a partially-resolved
/// environment it explicitly asked for.
pub fn run_task(
    task: &Task,
    index: usize,
    env_name: &str,
    eb: &mut EbGateway,
    runner: &dyn CommandRunner,
    dir: &Path,
) -> bool {
    let label = task.label(index);

    let injected = if task.inject_eb_env.is_requested() {
        match eb.env(task.inject_eb_env.target(env_name)) {
            Some(vars) => Some(vars),
            None => {
                log_status!("task", "Failed to retrieve EB environment for {}", label);
                return false;
            }
        }
    } else {
        None
    };

    let mut command = task.command.clone();
    if task.append_env_name {
        command.push_str(" --eb-env ");
        command.push_str(env_name);
    }

    if let Some(description) = &task.description {
        if !description.is_empty() {
            log_status!("task", "Running {} - {}", label, description);
        }
    }

    let mut options =
        RunOptions::timeout_ms(task.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT_MS)).in_dir(dir);
    if let Some(vars) = injected.filter(|vars: &HashMap<String, String>| !vars.is_empty()) {
        options = options.with_env(vars);
    }

    let output = runner.run("sh", &["-c", &command], &options);
    if output.success {
        log_status!("task", "Completed {}", label);
    } else {
        let detail = error_text(&output);
        if detail.is_empty() {
            log_status!("task", "Failed to run {}", label);
        } else {
            log_status!("task", "Failed to run {}: {}", label, detail);
        }
    }
    output.success
}
