//! Unified error types for the Retune workspace.
//!
//! The resource-update variants mirror the failure modes of a live limit
//! change: caller errors, lifecycle races, kernel rejections, transient I/O,
//! optimistic-versioning conflicts, and the one unrecoverable case where the
//! kernel and the committed configuration no longer agree.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ContainerId, ControlKey, Limit};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RetuneError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The requested resource values are malformed or violate a limit
    /// invariant. Raised before any kernel write.
    #[error("invalid resource spec: {message}")]
    InvalidResourceSpec {
        /// Description of the rejected value.
        message: String,
    },

    /// The container's enforcement surface is gone or its lifecycle moved
    /// away from `running` while an update was in flight.
    #[error("container {id} is not running")]
    ContainerNotRunning {
        /// Container that is no longer running.
        id: ContainerId,
    },

    /// The kernel refused a single control-file write.
    #[error("kernel rejected {key}={value} for container {id}: {source}")]
    KernelRejected {
        /// Container whose cgroup refused the write.
        id: ContainerId,
        /// Control that was being written.
        key: ControlKey,
        /// Value the kernel refused.
        value: Limit,
        /// Underlying errno-carrying error.
        source: std::io::Error,
    },

    /// A transient syscall-layer failure or a write timeout.
    #[error("I/O failure writing {key} for container {id}: {message}")]
    IoFailure {
        /// Container being written.
        id: ContainerId,
        /// Control that was being written.
        key: ControlKey,
        /// Description of the failure.
        message: String,
    },

    /// A commit raced with another writer of the same container.
    #[error("concurrent modification of container {id}: expected version {expected}, found {found}")]
    ConcurrentModification {
        /// Container whose record changed underneath the commit.
        id: ContainerId,
        /// Version the committer read.
        expected: u64,
        /// Version actually stored.
        found: u64,
    },

    /// A rollback failed: kernel enforcement no longer matches the committed
    /// limits and inspect results cannot be trusted for this container.
    #[error("container {id} is in an inconsistent state: {message}")]
    InconsistentState {
        /// Container left inconsistent.
        id: ContainerId,
        /// What could not be restored.
        message: String,
    },
}

impl RetuneError {
    /// Shorthand for an [`RetuneError::InvalidResourceSpec`].
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidResourceSpec {
            message: message.into(),
        }
    }

    /// Returns `true` for failures that leave no side effects behind and may
    /// succeed if the whole update is retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IoFailure { .. } | Self::ConcurrentModification { .. }
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RetuneError>;
