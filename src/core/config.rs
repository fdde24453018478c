//! Release configuration loading and validation.

use std::path::Path;

use serde::Deserialize;

use crate::core::error::{Error, Result};
use crate::core::git::PROTECTED_BRANCH;
use crate::core::package::PackageChanges;
use crate::core::task::Task;

pub const CONFIG_FILE_NAME: &str = "ebr.config.json";
pub const DEFAULT_RELEASE_NAME: &str = "eb-deploy-release";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConfig {
    release: ReleaseSettings,
    tasks: Vec<Task>,
    #[serde(rename = "package")]
    package_changes: PackageChanges,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseSettings {
    /// Release branch name. Normalized to lowercase with whitespace removed.
    pub name: String,
    /// Keep the release branch around after the run.
    pub keep: bool,
    /// Git-ignored paths to force-add to the release commit.
    pub include_ignored: Vec<String>,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_RELEASE_NAME.to_string(),
            keep: true,
            include_ignored: Vec::new(),
        }
    }
}

/// Validated configuration, ready for a pipeline run.
#[derive(Debug, Clone)]
pub struct EbrConfig {
    pub release: ReleaseSettings,
    pub tasks: Vec<Task>,
    pub package_changes: PackageChanges,
}

impl EbrConfig {
    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut release = raw.release;
        release.name = normalize_branch_name(&release.name);
        if release.name.is_empty() {
            release.name = DEFAULT_RELEASE_NAME.to_string();
        }
        if release.name == PROTECTED_BRANCH {
            return Err(Error::config_invalid_value(
                "release.name",
                format!("release branch may not be named \"{PROTECTED_BRANCH}\""),
            ));
        }
        Ok(Self {
            release,
            tasks: raw.tasks,
            package_changes: raw.package_changes,
        })
    }
}

fn normalize_branch_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Load configuration from `file` (tilde-expanded) or `ebr.config.json`
/// in `cwd`. A missing file is not an error; the caller decides whether
/// to continue without one. A file that exists but cannot be parsed or
/// validated is fatal.
pub fn load(cwd: impl AsRef<Path>, file: Option<&str>) -> Result<Option<EbrConfig>> {
    let path: std::path::PathBuf = match file {
        Some(file) => shellexpand::tilde(file).into_owned().into(),
        None => cwd.as_ref().join(CONFIG_FILE_NAME),
    };
    load_path(&path)
}

fn load_path(path: &Path) -> Result<Option<EbrConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(path.display().to_string())))?;
    let parsed: RawConfig = serde_json::from_str(&raw)
        .map_err(|e| Error::config_invalid_json(e, path.display().to_string()))?;
    EbrConfig::from_raw(parsed).map(Some)
}
