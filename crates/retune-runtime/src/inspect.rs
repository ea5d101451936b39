//! Read-only view of committed resource limits.
//!
//! Inspect never reads the kernel. It reports the store's latest committed
//! version, which is either the value before an in-flight update or the value
//! after its commit, never a half-applied mix.

use retune_common::error::Result;
use retune_common::types::{ContainerId, ContainerState, ResourceLimits};
use serde::Serialize;

use crate::store::{ConfigStore, Versioned};

/// Returns the committed limits of `id`.
///
/// # Errors
///
/// Returns [`RetuneError::NotFound`](retune_common::error::RetuneError::NotFound)
/// if the container has no record.
pub fn read(store: &ConfigStore, id: &ContainerId) -> Result<ResourceLimits> {
    Ok(store.get(id)?.limits)
}

/// Returns the committed limits of `id` with their version.
///
/// # Errors
///
/// Returns [`RetuneError::NotFound`](retune_common::error::RetuneError::NotFound)
/// if the container has no record.
pub fn read_versioned(store: &ConfigStore, id: &ContainerId) -> Result<Versioned> {
    store.get(id)
}

/// Everything `retune inspect` reports about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    /// Container identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Committed resource limits.
    #[serde(rename = "HostConfig")]
    pub resources: ResourceLimits,
    /// Version of the committed limits.
    pub version: u64,
}
