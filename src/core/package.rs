//! Structural edits to `package.json` with lock-file regeneration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::log_status;
use crate::utils::command::{CommandRunner, RunOptions};

const MANIFEST_FILE: &str = "package.json";
const SHRINKWRAP_TIMEOUT_MS: u64 = 120_000;

/// Manifest edits declared in configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageChanges {
    /// Packages to move from `dependencies` to `devDependencies`.
    pub move_to_dev: Vec<String>,
    /// Packages to move from `devDependencies` to `dependencies`.
    pub move_from_dev: Vec<String>,
    /// Script edits: a string sets/replaces, `false` removes.
    pub scripts: HashMap<String, ScriptEdit>,
}

impl PackageChanges {
    pub fn is_empty(&self) -> bool {
        self.move_to_dev.is_empty() && self.move_from_dev.is_empty() && self.scripts.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScriptEdit {
    Set(String),
    Flag(bool),
}

pub struct PackageMutator<'r> {
    runner: &'r dyn CommandRunner,
    dir: PathBuf,
}

impl<'r> PackageMutator<'r> {
    pub fn new(runner: &'r dyn CommandRunner, dir: impl AsRef<Path>) -> Self {
        Self {
            runner,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Apply the declared edits. When nothing actually changed the
    /// in-memory manifest, succeeds without touching disk. When the
    /// manifest was written but lock regeneration fails, the manifest
    /// stays written and the failure is reported; the two are separate
    /// commit points.
    pub fn modify(&self, changes: &PackageChanges) -> bool {
        let Some(mut manifest) = self.load() else {
            log_status!("package", "Failed to load {}", MANIFEST_FILE);
            return false;
        };

        let mut changed = move_dependencies(&mut manifest, &changes.move_to_dev, true);
        changed |= move_dependencies(&mut manifest, &changes.move_from_dev, false);
        changed |= apply_script_edits(&mut manifest, &changes.scripts);

        if !changed {
            return true;
        }

        if !self.save(&manifest) {
            return false;
        }
        log_status!("package", "Saved changes to {}", MANIFEST_FILE);

        if !self.lock() {
            log_status!("package", "Failed to regenerate lock file");
            return false;
        }
        true
    }

    fn load(&self) -> Option<Value> {
        let raw = std::fs::read_to_string(self.dir.join(MANIFEST_FILE)).ok()?;
        let manifest: Value = serde_json::from_str(&raw).ok()?;
        manifest.is_object().then_some(manifest)
    }

    fn save(&self, manifest: &Value) -> bool {
        let Ok(mut raw) = serde_json::to_string_pretty(manifest) else {
            return false;
        };
        raw.push('\n');
        std::fs::write(self.dir.join(MANIFEST_FILE), raw).is_ok()
    }

    /// Regenerate `npm-shrinkwrap.json` (overrides `package-lock.json`).
    fn lock(&self) -> bool {
        log_status!("package", "Generating npm-shrinkwrap.json");
        self.runner
            .run(
                "npm",
                &["shrinkwrap"],
                &RunOptions::timeout_ms(SHRINKWRAP_TIMEOUT_MS).in_dir(&self.dir),
            )
            .success
    }
}

/// Move packages between dependency buckets. A package absent from the
/// expected source bucket is a no-op; versions are carried over as-is and
/// nothing is ever created or removed outright.
fn move_dependencies(manifest: &mut Value, packages: &[String], to_dev: bool) -> bool {
    let (from, to) = if to_dev {
        ("dependencies", "devDependencies")
    } else {
        ("devDependencies", "dependencies")
    };

    let mut moved = false;
    for package in packages {
        let Some(version) = manifest
            .get_mut(from)
            .and_then(Value::as_object_mut)
            .and_then(|bucket| bucket.remove(package))
        else {
            continue;
        };
        if manifest.get(to).and_then(Value::as_object).is_none() {
            manifest[to] = Value::Object(Map::new());
        }
        manifest[to][package.as_str()] = version;
        moved = true;
    }
    moved
}

/// Apply script table edits. Setting a script to its current value is
/// not a change; removal only counts when the script existed.
fn apply_script_edits(manifest: &mut Value, edits: &HashMap<String, ScriptEdit>) -> bool {
    let mut changed = false;
    for (name, edit) in edits {
        match edit {
            ScriptEdit::Set(command) if !command.is_empty() => {
                let current = manifest
                    .get("scripts")
                    .and_then(|s| s.get(name))
                    .and_then(Value::as_str);
                if current == Some(command.as_str()) {
                    continue;
                }
                if manifest.get("scripts").and_then(Value::as_object).is_none() {
                    manifest["scripts"] = Value::Object(Map::new());
                }
                manifest["scripts"][name.as_str()] = Value::String(command.clone());
                changed = true;
            }
            ScriptEdit::Flag(false) => {
                let removed = manifest
                    .get_mut("scripts")
                    .and_then(Value::as_object_mut)
                    .and_then(|scripts| scripts.remove(name));
                if removed.is_some() {
                    changed = true;
                }
            }
            _ => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::test_support::ScriptedRunner;
    use tempfile::TempDir;

    fn write_manifest(dir: &TempDir, contents: &str) {
        std::fs::write(dir.path().join(MANIFEST_FILE), contents).expect("write manifest");
    }

    fn read_manifest(dir: &TempDir) -> Value {
        let raw = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).expect("read manifest");
        serde_json::from_str(&raw).expect("parse manifest")
    }

    const BASE: &str = r#"{
  "name": "demo",
  "dependencies": { "express": "^4.18.0", "lodash": "^4.17.0" },
  "devDependencies": { "mocha": "^10.0.0" },
  "scripts": { "start": "node server.js", "test": "mocha" }
}"#;

    #[test]
    fn moves_packages_between_buckets() {
        let dir = TempDir::new().expect("temp dir");
        write_manifest(&dir, BASE);
        let runner = ScriptedRunner::new();
        let mutator = PackageMutator::new(&runner, dir.path());

        let changes = PackageChanges {
            move_to_dev: vec!["lodash".to_string()],
            move_from_dev: vec!["mocha".to_string()],
            ..Default::default()
        };
        assert!(mutator.modify(&changes));

        let manifest = read_manifest(&dir);
        assert!(manifest["dependencies"].get("lodash").is_none());
        assert_eq!(manifest["devDependencies"]["lodash"], "^4.17.0");
        assert_eq!(manifest["dependencies"]["mocha"], "^10.0.0");
        assert!(manifest["devDependencies"].get("mocha").is_none());
        assert_eq!(runner.calls_matching("npm shrinkwrap"), 1);
    }

    #[test]
    fn missing_package_in_source_bucket_is_a_noop() {
        let dir = TempDir::new().expect("temp dir");
        write_manifest(&dir, BASE);
        let runner = ScriptedRunner::new();
        let mutator = PackageMutator::new(&runner, dir.path());

        let changes = PackageChanges {
            move_to_dev: vec!["not-a-dep".to_string()],
            ..Default::default()
        };
        assert!(mutator.modify(&changes));
        // Nothing changed, so nothing was written and no lock was made.
        assert_eq!(runner.calls.borrow().len(), 0);
    }

    #[test]
    fn script_set_and_remove() {
        let dir = TempDir::new().expect("temp dir");
        write_manifest(&dir, BASE);
        let runner = ScriptedRunner::new();
        let mutator = PackageMutator::new(&runner, dir.path());

        let mut scripts = HashMap::new();
        scripts.insert(
            "prestart".to_string(),
            ScriptEdit::Set("node prep.js".to_string()),
        );
        scripts.insert("test".to_string(), ScriptEdit::Flag(false));
        let changes = PackageChanges {
            scripts,
            ..Default::default()
        };
        assert!(mutator.modify(&changes));

        let manifest = read_manifest(&dir);
        assert_eq!(manifest["scripts"]["prestart"], "node prep.js");
        assert!(manifest["scripts"].get("test").is_none());
    }

    #[test]
    fn setting_script_to_current_value_is_not_a_change() {
        let dir = TempDir::new().expect("temp dir");
        write_manifest(&dir, BASE);
        let runner = ScriptedRunner::new();
        let mutator = PackageMutator::new(&runner, dir.path());

        let mut scripts = HashMap::new();
        scripts.insert("test".to_string(), ScriptEdit::Set("mocha".to_string()));
        // `true` is tolerated but edits nothing.
        scripts.insert("start".to_string(), ScriptEdit::Flag(true));
        let changes = PackageChanges {
            scripts,
            ..Default::default()
        };

        let before = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).expect("read");
        assert!(mutator.modify(&changes));
        let after = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).expect("read");
        assert_eq!(before, after);
        assert_eq!(runner.calls_matching("npm shrinkwrap"), 0);
    }

    #[test]
    fn lock_failure_reports_but_keeps_manifest_written() {
        let dir = TempDir::new().expect("temp dir");
        write_manifest(&dir, BASE);
        let runner = ScriptedRunner::new();
        runner.respond("npm shrinkwrap", crate::utils::command::RunOutput::failure());
        let mutator = PackageMutator::new(&runner, dir.path());

        let changes = PackageChanges {
            move_to_dev: vec!["lodash".to_string()],
            ..Default::default()
        };
        assert!(!mutator.modify(&changes));

        // The manifest write stands; only the lock step failed.
        let manifest = read_manifest(&dir);
        assert_eq!(manifest["devDependencies"]["lodash"], "^4.17.0");
    }

    #[test]
    fn missing_manifest_fails() {
        let dir = TempDir::new().expect("temp dir");
        let runner = ScriptedRunner::new();
        let mutator = PackageMutator::new(&runner, dir.path());
        assert!(!mutator.modify(&PackageChanges::default()));
    }
}
