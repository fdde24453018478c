//! Version control gateway over the `git` CLI.
//!
//! Every operation returns a domain value or a failure sentinel; process
//! failures never escape as errors. When the tool is missing, every
//! operation is a no-op returning its failure sentinel.

use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;

use crate::utils::command::{CommandRunner, RunOptions};

/// The branch that must never be deleted or force-overwritten.
pub const PROTECTED_BRANCH: &str = "master";

const QUICK_TIMEOUT_MS: u64 = 3_000;
const ADD_TIMEOUT_MS: u64 = 5_000;
const MUTATE_TIMEOUT_MS: u64 = 10_000;

const USERNAME_FALLBACK: &str = "HUMAN";

/// Snapshot of the working tree's uncommitted state.
///
/// `None` means "no entries of that kind"; callers test presence, not
/// emptiness. The snapshot is stale as soon as any add/commit/stash runs,
/// so it must never be carried across a mutating call.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub untracked: Option<Vec<String>>,
    pub ignored: Option<Vec<String>>,
}

pub struct GitGateway<'r> {
    runner: &'r dyn CommandRunner,
    dir: PathBuf,
    available: bool,
    username: Option<String>,
}

impl<'r> GitGateway<'r> {
    pub fn new(runner: &'r dyn CommandRunner, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let available = Self::probe(runner, &dir);
        Self {
            runner,
            dir,
            available,
            username: None,
        }
    }

    fn probe(runner: &dyn CommandRunner, dir: &Path) -> bool {
        let output = runner.run(
            "git",
            &["--version"],
            &RunOptions::timeout_ms(QUICK_TIMEOUT_MS).in_dir(dir),
        );
        if !output.success {
            return false;
        }
        Regex::new(r"(?i)git version \d+\.\d+\.\d+")
            .map(|re| re.is_match(&output.stdout))
            .unwrap_or(false)
    }

    /// Whether the `git` tool was found and its version string validated.
    pub fn available(&self) -> bool {
        self.available
    }

    fn quick(&self, args: &[&str]) -> crate::utils::command::RunOutput {
        self.runner
            .run("git", args, &RunOptions::timeout_ms(QUICK_TIMEOUT_MS).in_dir(&self.dir))
    }

    fn mutate(&self, args: &[&str]) -> crate::utils::command::RunOutput {
        self.runner
            .run("git", args, &RunOptions::timeout_ms(MUTATE_TIMEOUT_MS).in_dir(&self.dir))
    }

    /// Parse `git status` into ignored vs. everything-else path sets.
    pub fn changes(&self) -> Option<ChangeSet> {
        if !self.available {
            return None;
        }
        let output = self.quick(&["status", "--porcelain=v1", "--ignored"]);
        if !output.success {
            return None;
        }

        let mut untracked = Vec::new();
        let mut ignored = Vec::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            let mut parts = line.splitn(2, char::is_whitespace);
            let (Some(status), Some(path)) = (parts.next(), parts.next()) else {
                continue;
            };
            let path = path.trim().to_string();
            if path.is_empty() {
                continue;
            }
            if status == "!!" {
                ignored.push(path);
            } else {
                untracked.push(path);
            }
        }

        Some(ChangeSet {
            untracked: (!untracked.is_empty()).then_some(untracked),
            ignored: (!ignored.is_empty()).then_some(ignored),
        })
    }

    /// Stage files for commit. With no `files`, stages all non-ignored
    /// changes. `force_files` are staged with `-f` (required for paths
    /// that are normally excluded by .gitignore).
    pub fn add(&self, files: Option<&[String]>, force_files: Option<&[String]>) -> bool {
        if !self.available {
            return false;
        }

        let mut args: Vec<&str> = vec!["add"];
        match files {
            Some(files) if !files.is_empty() => args.extend(files.iter().map(String::as_str)),
            _ => args.push("-A"),
        }
        let output = self
            .runner
            .run("git", &args, &RunOptions::timeout_ms(ADD_TIMEOUT_MS).in_dir(&self.dir));
        if !output.success {
            return false;
        }

        if let Some(forced) = force_files {
            if !forced.is_empty() {
                let mut args: Vec<&str> = vec!["add", "-f"];
                args.extend(forced.iter().map(String::as_str));
                let output = self.runner.run(
                    "git",
                    &args,
                    &RunOptions::timeout_ms(ADD_TIMEOUT_MS).in_dir(&self.dir),
                );
                if !output.success {
                    return false;
                }
            }
        }

        true
    }

    /// Stage everything, then stash. Leaves the working tree clean.
    pub fn stash(&self) -> bool {
        if !self.add(None, None) {
            return false;
        }
        self.mutate(&["stash"]).success
    }

    /// Restore the most recent stash onto the current branch.
    pub fn pop(&self) -> bool {
        if !self.available {
            return false;
        }
        self.mutate(&["stash", "pop"]).success
    }

    /// Apply the most recent stash, letting the stashed content win over
    /// whatever the current branch holds, then drop the consumed entry so
    /// a later pop targets the stash underneath.
    pub fn merge_stash(&self) -> bool {
        if !self.available {
            return false;
        }
        if !self.mutate(&["checkout", "stash@{0}", "--", "."]).success {
            return false;
        }
        self.drop_stash()
    }

    /// Discard the most recent stash entry without applying it.
    pub fn drop_stash(&self) -> bool {
        if !self.available {
            return false;
        }
        self.mutate(&["stash", "drop"]).success
    }

    /// Switch to `branch`, creating it first when it does not exist
    /// locally. One checkout invocation either way.
    pub fn checkout(&self, branch: &str) -> bool {
        if !self.available {
            return false;
        }
        let name = strip_whitespace(branch);
        if name.is_empty() {
            return false;
        }
        let args: Vec<&str> = if self.has_branch(&name) {
            vec!["checkout", &name]
        } else {
            vec!["checkout", "-b", &name]
        };
        self.quick(&args).success
    }

    /// Exact (case- and whitespace-normalized) match against the local
    /// branch list.
    pub fn has_branch(&self, branch: &str) -> bool {
        if !self.available {
            return false;
        }
        let name = strip_whitespace(branch);
        if name.is_empty() {
            return false;
        }
        let output = self.quick(&["branch"]);
        if !output.success {
            return false;
        }
        output
            .stdout
            .lines()
            .map(|line| line.trim_start_matches('*').trim())
            .any(|candidate| candidate.eq_ignore_ascii_case(&name))
    }

    /// Force-delete a local branch. Hard-refuses the protected base
    /// branch, whatever casing or whitespace the caller passes.
    pub fn delete_branch(&self, branch: &str) -> bool {
        if !self.available {
            return false;
        }
        let name = strip_whitespace(branch);
        if name.is_empty() || name.eq_ignore_ascii_case(PROTECTED_BRANCH) {
            return false;
        }
        if !self.has_branch(&name) {
            return false;
        }
        self.runner
            .run(
                "git",
                &["branch", "-D", &name],
                &RunOptions::timeout_ms(ADD_TIMEOUT_MS).in_dir(&self.dir),
            )
            .success
    }

    /// Commit staged changes. The message gets an author + UTC timestamp
    /// suffix for audit traceability.
    pub fn commit(&mut self, message: &str) -> bool {
        if !self.available {
            return false;
        }
        let message = if message.is_empty() { "Git Commit" } else { message };
        let stamped = format!(
            "{} --> {} --> {}",
            message,
            self.username(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
        );
        self.mutate(&["commit", "-m", &stamped]).success
    }

    /// Push the named branch (or the current one) with upstream tracking.
    pub fn push(&self, branch: Option<&str>) -> bool {
        if !self.available {
            return false;
        }
        let target = branch.unwrap_or("HEAD");
        self.mutate(&["push", "-u", "origin", target]).success
    }

    pub fn current_branch(&self) -> Option<String> {
        if !self.available {
            return None;
        }
        let output = self.quick(&["rev-parse", "--abbrev-ref", "HEAD"]);
        if !output.success {
            return None;
        }
        let branch = output.stdout.trim().to_string();
        (!branch.is_empty()).then_some(branch)
    }

    /// Git user name from config, cached for the process lifetime.
    pub fn username(&mut self) -> String {
        if let Some(name) = &self.username {
            return name.clone();
        }
        let output = self.quick(&["config", "user.name"]);
        let name = if output.success && !output.stdout.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            USERNAME_FALLBACK.to_string()
        };
        self.username = Some(name.clone());
        name
    }
}

fn strip_whitespace(value: &str) -> String {
    value.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::test_support::ScriptedRunner;
    use crate::utils::command::RunOutput;

    fn gateway<'r>(runner: &'r ScriptedRunner) -> GitGateway<'r> {
        runner.respond("git --version", RunOutput::ok("git version 2.43.0\n"));
        GitGateway::new(runner, "/tmp")
    }

    #[test]
    fn probe_rejects_unexpected_version_string() {
        let runner = ScriptedRunner::new();
        runner.respond("git --version", RunOutput::ok("not a git banner"));
        let git = GitGateway::new(&runner, "/tmp");
        assert!(!git.available());
    }

    #[test]
    fn operations_are_noops_when_unavailable() {
        let runner = ScriptedRunner::failing_by_default();
        let git = GitGateway::new(&runner, "/tmp");
        assert!(!git.available());
        assert!(git.changes().is_none());
        assert!(!git.add(None, None));
        assert!(!git.stash());
        assert!(!git.checkout("feature"));
        // Only the probe itself reached the runner.
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn changes_splits_ignored_from_untracked() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        runner.respond(
            "git status --porcelain=v1 --ignored",
            RunOutput::ok("?? new.txt\n M lib/app.js\n!! node_modules\n"),
        );
        let changes = git.changes().expect("changes");
        assert_eq!(
            changes.untracked.as_deref(),
            Some(&["new.txt".to_string(), "lib/app.js".to_string()][..])
        );
        assert_eq!(
            changes.ignored.as_deref(),
            Some(&["node_modules".to_string()][..])
        );
    }

    #[test]
    fn changes_represents_clean_tree_as_absent_sets() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        runner.respond("git status --porcelain=v1 --ignored", RunOutput::ok(""));
        let changes = git.changes().expect("changes");
        assert!(changes.untracked.is_none());
        assert!(changes.ignored.is_none());
    }

    #[test]
    fn add_stages_all_by_default_and_forces_ignored_files() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        let forced = vec![".env".to_string()];
        assert!(git.add(None, Some(&forced)));
        let calls = runner.calls.borrow();
        assert!(calls.contains(&"git add -A".to_string()));
        assert!(calls.contains(&"git add -f .env".to_string()));
    }

    #[test]
    fn checkout_creates_branch_only_when_missing() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        runner.respond("git branch", RunOutput::ok("* master\n  develop\n"));
        assert!(git.checkout("develop"));
        assert!(runner.calls.borrow().contains(&"git checkout develop".to_string()));

        runner.respond("git branch", RunOutput::ok("* master\n  develop\n"));
        assert!(git.checkout("release-x"));
        assert!(runner
            .calls
            .borrow()
            .contains(&"git checkout -b release-x".to_string()));
    }

    #[test]
    fn has_branch_normalizes_case_and_marker() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        runner.respond("git branch", RunOutput::ok("* master\n  Release-Branch\n"));
        assert!(git.has_branch(" release-branch "));
    }

    #[test]
    fn delete_branch_refuses_protected_branch_in_any_casing() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        for name in ["master", "MASTER", " Master ", "mAsTeR\t"] {
            assert!(!git.delete_branch(name), "deleted {:?}", name);
        }
        assert_eq!(runner.calls_matching("git branch -D"), 0);
    }

    #[test]
    fn delete_branch_requires_existence_then_force_deletes() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        runner.respond("git branch", RunOutput::ok("* master\n"));
        assert!(!git.delete_branch("gone"));

        runner.respond("git branch", RunOutput::ok("* master\n  stale-release\n"));
        assert!(git.delete_branch("stale-release"));
        assert!(runner
            .calls
            .borrow()
            .contains(&"git branch -D stale-release".to_string()));
    }

    #[test]
    fn commit_appends_author_and_utc_timestamp() {
        let runner = ScriptedRunner::new();
        let mut git = gateway(&runner);
        runner.respond("git config user.name", RunOutput::ok("Phil\n"));
        assert!(git.commit("EB release"));
        let calls = runner.calls.borrow();
        let commit = calls
            .iter()
            .find(|c| c.starts_with("git commit -m"))
            .expect("commit call");
        assert!(commit.contains("EB release --> Phil --> "));
        assert!(commit.ends_with("GMT"));
    }

    #[test]
    fn username_is_cached_after_first_lookup() {
        let runner = ScriptedRunner::new();
        let mut git = gateway(&runner);
        runner.respond("git config user.name", RunOutput::ok("Phil\n"));
        assert_eq!(git.username(), "Phil");
        assert_eq!(git.username(), "Phil");
        assert_eq!(runner.calls_matching("git config user.name"), 1);
    }

    #[test]
    fn username_falls_back_when_unset() {
        let runner = ScriptedRunner::new();
        let mut git = gateway(&runner);
        runner.respond("git config user.name", RunOutput::failure());
        assert_eq!(git.username(), "HUMAN");
    }

    #[test]
    fn merge_stash_applies_then_drops() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        assert!(git.merge_stash());
        let calls = runner.calls.borrow();
        let apply = calls
            .iter()
            .position(|c| c == "git checkout stash@{0} -- .")
            .expect("apply call");
        let drop = calls
            .iter()
            .position(|c| c == "git stash drop")
            .expect("drop call");
        assert!(apply < drop);
    }

    #[test]
    fn push_tracks_upstream_for_current_or_named_branch() {
        let runner = ScriptedRunner::new();
        let git = gateway(&runner);
        assert!(git.push(None));
        assert!(git.push(Some("release-1")));
        let calls = runner.calls.borrow();
        assert!(calls.contains(&"git push -u origin HEAD".to_string()));
        assert!(calls.contains(&"git push -u origin release-1".to_string()));
    }
}
