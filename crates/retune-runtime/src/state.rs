//! Persistent lifecycle index.
//!
//! Maintains a local JSON index of all containers and their current
//! lifecycle states, enabling daemon-less management across CLI
//! invocations. Resource limits are not stored here; they live in the
//! versioned [`ConfigStore`](crate::store::ConfigStore).

use std::io::Write;
use std::path::Path;

use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ContainerState};
use serde::{Deserialize, Serialize};

/// Persistent record of a container's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Container identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// PID of the init process (if running).
    pub pid: Option<u32>,
    /// Command executed inside the container.
    pub command: Vec<String>,
    /// Environment variables passed to the process.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// ISO-8601 timestamp of creation.
    pub created_at: String,
}

/// The full lifecycle index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateIndex {
    /// Every tracked container.
    pub containers: Vec<StateEntry>,
}

impl StateIndex {
    /// Finds a container by ID.
    #[must_use]
    pub fn find(&self, id: &ContainerId) -> Option<&StateEntry> {
        self.containers.iter().find(|e| e.id == *id)
    }

    /// Finds a container by ID for modification.
    pub fn find_mut(&mut self, id: &ContainerId) -> Option<&mut StateEntry> {
        self.containers.iter_mut().find(|e| e.id == *id)
    }
}

/// Loads the state index from disk.
///
/// A missing file is an empty index.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_state(path: &Path) -> Result<StateIndex> {
    tracing::debug!(path = %path.display(), "loading state index");
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateIndex::default()),
        Err(e) => Err(RetuneError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists the state index to disk atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(path: &Path, index: &StateIndex) -> Result<()> {
    tracing::debug!(path = %path.display(), containers = index.containers.len(), "saving state index");
    let content = serde_json::to_vec_pretty(index)?;
    write_atomic(path, &content)
}

/// Writes `content` to a uniquely named sibling temp file and renames it
/// over `path`, so readers see either the old or the new file, never a torn
/// one, and concurrent writers never share a temp file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the write or
/// rename fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| RetuneError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| RetuneError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(content).map_err(|e| RetuneError::Io {
        path: tmp.path().to_path_buf(),
        source: e,
    })?;
    let _ = tmp.persist(path).map_err(|e| RetuneError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
