//! Agent configuration file.
//!
//! ```yaml
//! targets:
//!   - name: web
//!     url: https://github.com/example/deployments
//!     branch: main
//!     target_path: raw
//!     schedule_secs: 60
//!     skew_ms: 5000
//!     method:
//!       kind: raw
//!       pull_image: true
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

fn default_branch() -> String {
    "main".to_string()
}

fn default_glob() -> String {
    "**".to_string()
}

fn default_schedule_secs() -> u64 {
    300
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// One tracked repository/branch/path and how to reconcile it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository holding the definitions.
    #[serde(default)]
    pub target_path: String,
    /// Glob applied to paths relative to `target_path`.
    #[serde(default = "default_glob")]
    pub glob: String,
    #[serde(default = "default_schedule_secs")]
    pub schedule_secs: u64,
    /// Upper bound of the random delay before the first pass.
    #[serde(default)]
    pub skew_ms: u64,
    pub method: MethodConfig,
}

impl TargetConfig {
    pub fn schedule(&self) -> Duration {
        Duration::from_secs(self.schedule_secs)
    }
}

/// Method selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodConfig {
    Raw {
        /// Pull images on every apply, even when present locally.
        #[serde(default)]
        pull_image: bool,
    },
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| SyncError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(SyncError::Config("target name must not be empty".to_string()));
            }
            if target.name.contains('/') || target.name == "." || target.name == ".." {
                return Err(SyncError::Config(format!(
                    "target name '{}' must be a plain directory name",
                    target.name
                )));
            }
            if !names.insert(target.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
            if target.url.is_empty() {
                return Err(SyncError::Config(format!(
                    "target '{}' has no url",
                    target.name
                )));
            }
            if target.schedule_secs == 0 {
                return Err(SyncError::Config(format!(
                    "target '{}' schedule_secs must be greater than zero",
                    target.name
                )));
            }
            glob::Pattern::new(&target.glob).map_err(|e| {
                SyncError::Config(format!("target '{}' has invalid glob: {e}", target.name))
            })?;
        }
        Ok(())
    }
}
