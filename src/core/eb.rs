//! Deployment gateway over the AWS Elastic Beanstalk CLI (`eb`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::log_status;
use crate::utils::command::{CommandRunner, RunOptions, RunOutput};

const QUICK_TIMEOUT_MS: u64 = 10_000;
const PRINTENV_TIMEOUT_MS: u64 = 60_000;

/// Cloud provisioning is slow; the deploy call gets half an hour before
/// the run gives up and moves on to cleanup.
const DEPLOYMENT_TIMEOUT_MS: u64 = 1_800_000;

/// Environments configured for the current EB application.
#[derive(Debug, Clone)]
pub struct EnvironmentList {
    pub environments: Vec<String>,
    pub default: Option<String>,
}

pub struct EbGateway<'r> {
    runner: &'r dyn CommandRunner,
    dir: PathBuf,
    available: bool,
    // Per-environment variable cache; multiple tasks may inject the same
    // environment and only the first request should hit the network.
    stored_envs: HashMap<String, HashMap<String, String>>,
}

impl<'r> EbGateway<'r> {
    pub fn new(runner: &'r dyn CommandRunner, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let available = Self::probe(runner, &dir);
        Self {
            runner,
            dir,
            available,
            stored_envs: HashMap::new(),
        }
    }

    fn probe(runner: &dyn CommandRunner, dir: &Path) -> bool {
        let output = runner.run(
            "eb",
            &["--version"],
            &RunOptions::timeout_ms(QUICK_TIMEOUT_MS).in_dir(dir),
        );
        if !output.success {
            return false;
        }
        Regex::new(r"(?i)eb cli \d+\.\d+\.\d+")
            .map(|re| re.is_match(&output.stdout))
            .unwrap_or(false)
    }

    /// Whether the `eb` tool was found and its version string validated.
    pub fn available(&self) -> bool {
        self.available
    }

    fn eb(&self, args: &[&str], timeout_ms: u64) -> RunOutput {
        self.runner
            .run("eb", args, &RunOptions::timeout_ms(timeout_ms).in_dir(&self.dir))
    }

    /// List the application's environments. A `*`-prefixed line marks the
    /// default environment; the marker is stripped before storage.
    pub fn list(&self) -> Option<EnvironmentList> {
        if !self.available {
            return None;
        }
        let output = self.eb(&["list"], QUICK_TIMEOUT_MS);
        if !output.success {
            return None;
        }

        let mut environments = Vec::new();
        let mut default = None;
        for line in output.stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('*') {
                let name = name.trim().to_string();
                default = Some(name.clone());
                environments.push(name);
            } else {
                environments.push(line.to_string());
            }
        }

        if environments.is_empty() {
            return None;
        }
        Some(EnvironmentList {
            environments,
            default,
        })
    }

    /// Fetch environment variables for `name`, memoized per name for the
    /// process lifetime.
    pub fn env(&mut self, name: &str) -> Option<HashMap<String, String>> {
        if !self.available {
            return None;
        }
        if let Some(cached) = self.stored_envs.get(name) {
            return Some(cached.clone());
        }

        log_status!("eb", "Retrieving environment variables for {}", name);
        let output = self.eb(&["printenv", name], PRINTENV_TIMEOUT_MS);
        if !output.success {
            return None;
        }

        let mut vars = HashMap::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            let parts: Vec<&str> = line.split('=').collect();
            if parts.len() == 2 {
                vars.insert(parts[0].trim().to_string(), parts[1].trim().to_string());
            }
        }

        self.stored_envs.insert(name.to_string(), vars.clone());
        Some(vars)
    }

    /// Deploy the current branch state to `name`. Timeout or non-zero
    /// exit is a failure outcome, not an error; the caller still owes a
    /// cleanup pass.
    pub fn deploy(&self, name: &str) -> bool {
        if !self.available {
            return false;
        }
        log_status!("eb", "Deploying to environment {}", name);
        self.eb(&["deploy", name], DEPLOYMENT_TIMEOUT_MS).success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::test_support::ScriptedRunner;

    fn gateway<'r>(runner: &'r ScriptedRunner) -> EbGateway<'r> {
        runner.respond("eb --version", RunOutput::ok("EB CLI 3.20.10 (Python 3.11)\n"));
        EbGateway::new(runner, "/tmp")
    }

    #[test]
    fn probe_rejects_unexpected_version_string() {
        let runner = ScriptedRunner::new();
        runner.respond("eb --version", RunOutput::ok("something else"));
        let eb = EbGateway::new(&runner, "/tmp");
        assert!(!eb.available());
    }

    #[test]
    fn list_parses_default_marker() {
        let runner = ScriptedRunner::new();
        let eb = gateway(&runner);
        runner.respond(
            "eb list",
            RunOutput::ok("app-staging\n* app-production\napp-qa\n"),
        );
        let list = eb.list().expect("list");
        assert_eq!(
            list.environments,
            vec!["app-staging", "app-production", "app-qa"]
        );
        assert_eq!(list.default.as_deref(), Some("app-production"));
    }

    #[test]
    fn list_fails_when_no_environments_exist() {
        let runner = ScriptedRunner::new();
        let eb = gateway(&runner);
        runner.respond("eb list", RunOutput::ok("\n"));
        assert!(eb.list().is_none());
    }

    #[test]
    fn env_parses_key_value_lines_and_skips_noise() {
        let runner = ScriptedRunner::new();
        let mut eb = gateway(&runner);
        runner.respond(
            "eb printenv app-qa",
            RunOutput::ok(" Environment Variables:\n     NODE_ENV = production\n     API_KEY = abc123\n     WEIRD = a = b\n"),
        );
        let vars = eb.env("app-qa").expect("env");
        assert_eq!(vars.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(vars.get("API_KEY").map(String::as_str), Some("abc123"));
        // Lines with more than one separator are dropped, not guessed at.
        assert!(!vars.contains_key("WEIRD"));
    }

    #[test]
    fn env_is_memoized_per_environment_name() {
        let runner = ScriptedRunner::new();
        let mut eb = gateway(&runner);
        runner.respond("eb printenv app-qa", RunOutput::ok("A = 1\n"));
        let first = eb.env("app-qa").expect("first fetch");
        let second = eb.env("app-qa").expect("cached fetch");
        assert_eq!(first, second);
        assert_eq!(runner.calls_matching("eb printenv app-qa"), 1);
    }

    #[test]
    fn env_failure_is_not_cached() {
        let runner = ScriptedRunner::new();
        let mut eb = gateway(&runner);
        runner.respond("eb printenv app-qa", RunOutput::failure());
        assert!(eb.env("app-qa").is_none());
        runner.respond("eb printenv app-qa", RunOutput::ok("A = 1\n"));
        assert!(eb.env("app-qa").is_some());
        assert_eq!(runner.calls_matching("eb printenv app-qa"), 2);
    }

    #[test]
    fn deploy_reports_failure_as_outcome() {
        let runner = ScriptedRunner::new();
        let eb = gateway(&runner);
        runner.respond("eb deploy app-qa", RunOutput::failure());
        assert!(!eb.deploy("app-qa"));
    }
}
