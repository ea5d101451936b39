//! Global configuration model for the Retune runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RetuneError};
use crate::types::ResourceLimits;

/// Root configuration for the Retune runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetuneConfig {
    /// Base directory for Retune state and data.
    pub data_dir: PathBuf,
    /// Mount point of the cgroup filesystem.
    pub cgroup_root: PathBuf,
    /// Parent group for container cgroups under each controller.
    pub cgroup_parent: String,
    /// Upper bound on a single cgroup write before it counts as failed.
    pub write_timeout_ms: u64,
    /// How often an update re-validates after a commit conflict.
    pub commit_retries: u32,
    /// Limits applied to containers created without explicit values.
    pub default_limits: ResourceLimits,
}

impl Default for RetuneConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            cgroup_root: PathBuf::from(constants::CGROUP_ROOT),
            cgroup_parent: constants::DEFAULT_CGROUP_PARENT.to_string(),
            write_timeout_ms: constants::DEFAULT_WRITE_TIMEOUT_MS,
            commit_retries: constants::DEFAULT_COMMIT_RETRIES,
            default_limits: ResourceLimits::default(),
        }
    }
}

impl RetuneConfig {
    /// Loads a configuration file. Fields missing from the file keep their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes invalid settings.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RetuneError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::Config`] when a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.write_timeout_ms == 0 {
            return Err(RetuneError::Config {
                message: "write_timeout_ms must be greater than 0".into(),
            });
        }
        if self.cgroup_parent.is_empty() || self.cgroup_parent.contains("..") {
            return Err(RetuneError::Config {
                message: format!("invalid cgroup_parent: {:?}", self.cgroup_parent),
            });
        }
        if !self.default_limits.swap_invariant_holds() {
            return Err(RetuneError::Config {
                message: "default_limits: memory swap limit must be at least the memory limit".into(),
            });
        }
        Ok(())
    }

    /// Path to the lifecycle index.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(constants::STATE_FILE_NAME)
    }

    /// Directory holding committed resource records.
    #[must_use]
    pub fn limits_dir(&self) -> PathBuf {
        self.data_dir.join(constants::LIMITS_DIR_NAME)
    }

    /// Timeout for a single cgroup write.
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
