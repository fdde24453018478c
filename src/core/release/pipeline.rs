//! The release pipeline: dependency checks through deploy and cleanup.
//!
//! The run is partially reversible. Side effects are recorded in
//! [`ReleaseState`] as they land, and `restore` undoes them in reverse
//! order no matter how the forward pass ended. Only a fatal error before
//! any side effect skips cleanup entirely.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::config::{self, EbrConfig, ReleaseSettings};
use crate::core::eb::EbGateway;
use crate::core::error::{Error, Result};
use crate::core::git::{GitGateway, PROTECTED_BRANCH};
use crate::core::package::PackageMutator;
use crate::core::perf::PerfTimer;
use crate::core::prompt::Decider;
use crate::core::release::types::{DeployMode, ReleaseOptions, ReleaseState, RunReport, RunResult};
use crate::core::task::run_task;
use crate::log_status;
use crate::utils::command::CommandRunner;

const SIMULATED_DEPLOY_DELAY: Duration = Duration::from_millis(1_500);

const FINISHED_BANNER: &str = "\n\n******** FINISHED EB RELEASE ********\n\n";
const FINISHED_WITH_ERRORS_BANNER: &str =
    "\n\n******** FINISHED EB RELEASE WITH ERRORS ********\n\n";

/// How the forward pass ended, before cleanup.
enum Drive {
    Completed { deploy_ok: bool, tasks_run: usize },
    Aborted { tasks_run: usize },
}

pub struct ReleasePipeline<'r> {
    git: GitGateway<'r>,
    eb: EbGateway<'r>,
    decider: &'r mut dyn Decider,
    runner: &'r dyn CommandRunner,
    cwd: PathBuf,
    options: ReleaseOptions,
    state: ReleaseState,
    perf: PerfTimer,
}

impl<'r> ReleasePipeline<'r> {
    pub fn new(
        runner: &'r dyn CommandRunner,
        decider: &'r mut dyn Decider,
        cwd: impl AsRef<Path>,
        options: ReleaseOptions,
    ) -> Self {
        let cwd = cwd.as_ref().to_path_buf();
        let git = GitGateway::new(runner, &cwd);
        let eb = EbGateway::new(runner, &cwd);
        let perf = PerfTimer::new(options.performance);
        Self {
            git,
            eb,
            decider,
            runner,
            cwd,
            options,
            state: ReleaseState::default(),
            perf,
        }
    }

    pub fn run(&mut self) -> Result<RunReport> {
        self.perf.start("dependency-check");
        self.check_dependencies()?;
        self.perf.end("dependency-check");

        let user = self.git.username();
        log_status!("release", "Welcome, {}", user);
        log_status!("release", "Starting EB release from {}", self.cwd.display());

        self.perf.start("environment-select");
        let selected = self.select_environment()?;
        self.perf.end("environment-select");
        let Some(environment) = selected else {
            return Ok(self.report(RunResult::UserAborted, None, 0, false));
        };
        log_status!("release", "Releasing to environment {}", environment);

        let config = config::load(&self.cwd, self.options.config_file.as_deref())?;
        let mut deploy_only = self.options.deploy_only;
        if config.is_none() && !deploy_only {
            self.decider
                .message(&format!("No {} found in this directory.", config::CONFIG_FILE_NAME));
            if !self
                .decider
                .confirm("Continue in deploy-only mode?", false)
            {
                return Ok(self.report(RunResult::UserAborted, Some(environment), 0, false));
            }
            deploy_only = true;
        }

        let keep = config
            .as_ref()
            .map(|c| c.release.keep)
            .unwrap_or(true);

        let outcome = match (&config, deploy_only) {
            (Some(config), false) => {
                let config = config.clone();
                self.drive(&environment, &config)
            }
            _ => {
                self.perf.start("deploy");
                let deploy_ok = self.deploy(&environment);
                self.perf.end("deploy");
                Ok(Drive::Completed {
                    deploy_ok,
                    tasks_run: 0,
                })
            }
        };

        self.perf.start("restore");
        self.restore(keep);
        self.perf.end("restore");
        self.perf.report();

        let (result, tasks_run) = match outcome? {
            Drive::Completed {
                deploy_ok: true,
                tasks_run,
            } => (RunResult::Success, tasks_run),
            Drive::Completed {
                deploy_ok: false,
                tasks_run,
            } => (RunResult::SuccessWithErrors, tasks_run),
            Drive::Aborted { tasks_run } => (RunResult::UserAborted, tasks_run),
        };

        match result {
            RunResult::Success => banner(FINISHED_BANNER),
            RunResult::SuccessWithErrors => banner(FINISHED_WITH_ERRORS_BANNER),
            RunResult::UserAborted => log_status!("release", "Release aborted"),
        }

        Ok(self.report(result, Some(environment), tasks_run, deploy_only))
    }

    fn check_dependencies(&self) -> Result<()> {
        if !self.git.available() {
            return Err(Error::dependency_missing(
                "git",
                "Install git: https://git-scm.com/downloads",
            ));
        }
        if !self.eb.available() {
            return Err(Error::dependency_missing(
                "eb",
                "Install the EB CLI: pip install awsebcli",
            ));
        }
        Ok(())
    }

    /// Resolve the target environment: a CLI candidate wins when it is
    /// configured, otherwise the user picks from the application's list.
    fn select_environment(&mut self) -> Result<Option<String>> {
        let Some(list) = self.eb.list() else {
            return Err(Error::deploy_command_failed(
                "No EB environments are configured for this directory",
            )
            .with_hint("Run `eb init` to configure the EB application first"));
        };

        if let Some(candidate) = &self.options.environment {
            if let Some(found) = list
                .environments
                .iter()
                .find(|e| e.eq_ignore_ascii_case(candidate))
            {
                return Ok(Some(found.clone()));
            }
            self.decider
                .message(&format!("Environment \"{candidate}\" is not configured."));
        }

        let default_index = list
            .default
            .as_ref()
            .and_then(|d| list.environments.iter().position(|e| e == d));
        Ok(self
            .decider
            .choose("Select an EB environment", &list.environments, default_index))
    }

    /// The full forward pass: inspect, stash, tasks, manifest, publish,
    /// deploy. Anything the user declines turns into an orderly abort.
    fn drive(&mut self, environment: &str, config: &EbrConfig) -> Result<Drive> {
        if config.tasks.is_empty()
            && !self
                .decider
                .confirm("No tasks are configured. Continue with the release?", true)
        {
            return Ok(Drive::Aborted { tasks_run: 0 });
        }

        self.perf.start("change-inspection");
        let changes = self
            .git
            .changes()
            .ok_or_else(|| Error::git_command_failed("Failed to inspect the working tree"))?;
        self.perf.end("change-inspection");
        if self.options.verbose {
            let pending = changes.untracked.as_ref().map_or(0, Vec::len);
            let ignored = changes.ignored.as_ref().map_or(0, Vec::len);
            log_status!("release", "{} pending and {} ignored paths", pending, ignored);
        }

        if changes.untracked.is_some() {
            if !self
                .decider
                .confirm("Uncommitted changes found. Stash them and continue?", true)
            {
                return Ok(Drive::Aborted { tasks_run: 0 });
            }
            if !self.git.stash() {
                return Err(Error::git_command_failed("Failed to stash working tree changes"));
            }
            self.state.did_stash = true;
            log_status!("release", "Stashed working tree changes");
        }

        let current = self
            .git
            .current_branch()
            .ok_or_else(|| Error::git_command_failed("Failed to determine the current branch"))?;
        // A leftover checkout of the release branch must not become the
        // restore target, or cleanup would strand the user there.
        let starting = if current.eq_ignore_ascii_case(&config.release.name) {
            PROTECTED_BRANCH.to_string()
        } else {
            current
        };
        self.state.starting_branch = Some(starting);

        self.perf.start("tasks");
        let total = config.tasks.len();
        let mut tasks_run = 0;
        for (index, task) in config.tasks.iter().enumerate() {
            if self.options.verbose {
                log_status!("release", "{}: {}", task.label(index + 1), task.command);
            }
            let ok = run_task(task, index + 1, environment, &mut self.eb, self.runner, &self.cwd);
            tasks_run += 1;
            if ok {
                continue;
            }
            let remaining = total - index - 1;
            let question = if remaining == 0 {
                format!(
                    "{} failed. Continue with the release anyway?",
                    task.label(index + 1)
                )
            } else {
                format!(
                    "{} failed. Continue with the remaining {} task(s)?",
                    task.label(index + 1),
                    remaining
                )
            };
            if !self.decider.confirm(&question, false) {
                return Ok(Drive::Aborted { tasks_run });
            }
        }
        self.perf.end("tasks");

        if !config.package_changes.is_empty() {
            self.perf.start("package-changes");
            let mutator = PackageMutator::new(self.runner, &self.cwd);
            let modified = mutator.modify(&config.package_changes);
            self.perf.end("package-changes");
            if !modified
                && !self
                    .decider
                    .confirm("Package manifest update failed. Continue anyway?", false)
            {
                return Ok(Drive::Aborted { tasks_run });
            }
        }

        self.perf.start("publish");
        self.publish(&config.release)?;
        self.perf.end("publish");

        self.perf.start("deploy");
        let deploy_ok = self.deploy(environment);
        self.perf.end("deploy");

        Ok(Drive::Completed {
            deploy_ok,
            tasks_run,
        })
    }

    /// Put the working tree's content onto the release branch and push it.
    ///
    /// A fresh branch carries the tree over on checkout; an existing one
    /// needs a transfer stash so the incoming content wins over whatever
    /// the branch held from an earlier release.
    fn publish(&mut self, release: &ReleaseSettings) -> Result<()> {
        let name = release.name.clone();
        let forced = (!release.include_ignored.is_empty()).then_some(&release.include_ignored[..]);

        if self.git.has_branch(&name) {
            if !self.git.add(None, forced) {
                return Err(Error::git_command_failed("Failed to stage release changes"));
            }
            if !self.git.stash() {
                return Err(Error::git_command_failed("Failed to stash release changes"));
            }
            self.state.transfer_stash = true;
            if !self.git.checkout(&name) {
                return Err(Error::git_command_failed(format!(
                    "Failed to check out release branch \"{name}\""
                )));
            }
            self.state.release_branch = Some(name.clone());
            if !self.git.merge_stash() {
                return Err(Error::git_command_failed(
                    "Failed to apply release changes onto the release branch",
                ));
            }
            self.state.transfer_stash = false;
        } else {
            if !self.git.checkout(&name) {
                return Err(Error::git_command_failed(format!(
                    "Failed to create release branch \"{name}\""
                )));
            }
            self.state.release_branch = Some(name.clone());
            if !self.git.add(None, forced) {
                return Err(Error::git_command_failed("Failed to stage release changes"));
            }
        }

        if !self.git.commit("EB release") {
            log_status!("release", "Nothing new to commit on {}", name);
        }
        if !self.git.push(Some(&name)) {
            return Err(Error::git_command_failed(format!(
                "Failed to push release branch \"{name}\""
            )));
        }
        log_status!("release", "Pushed release branch {}", name);
        Ok(())
    }

    fn deploy(&mut self, environment: &str) -> bool {
        match self.options.mode {
            DeployMode::Deploy => self.eb.deploy(environment),
            DeployMode::Simulate => {
                log_status!("release", "Simulating deploy to {}", environment);
                std::thread::sleep(SIMULATED_DEPLOY_DELAY);
                true
            }
        }
    }

    /// Undo this run's side effects: return to the starting branch, drop
    /// the release branch unless kept, and pop the pre-task stash last so
    /// the user's uncommitted work lands back on their own branch.
    fn restore(&mut self, keep: bool) {
        if let Some(branch) = self.state.starting_branch.take() {
            if !self.git.checkout(&branch) {
                log_status!("release", "Failed to return to branch {}", branch);
            }
        }
        if let Some(branch) = self.state.release_branch.take() {
            if !keep && !self.git.delete_branch(&branch) {
                log_status!("release", "Failed to delete release branch {}", branch);
            }
        }
        // An unconsumed transfer stash sits above the pre-task stash;
        // popping without dropping it first would hand the user
        // half-published release content instead of their own changes.
        if self.state.transfer_stash {
            if !self.git.drop_stash() {
                log_status!("release", "Failed to discard the release transfer stash");
            }
            self.state.transfer_stash = false;
        }
        if self.state.did_stash {
            if self.git.pop() {
                log_status!("release", "Restored stashed changes");
            } else {
                log_status!("release", "Failed to restore stashed changes");
            }
            self.state.did_stash = false;
        }
    }

    fn report(
        &self,
        result: RunResult,
        environment: Option<String>,
        tasks_run: usize,
        deploy_only: bool,
    ) -> RunReport {
        RunReport {
            result,
            environment,
            tasks_run,
            deploy_only,
            simulated: self.options.mode == DeployMode::Simulate,
        }
    }
}

fn banner(text: &str) {
    if std::io::stderr().is_terminal() {
        eprintln!("{text}");
    }
}
