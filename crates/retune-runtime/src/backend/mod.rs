//! Container lifecycle collaborators.
//!
//! The resource subsystem does not create or run processes itself. It asks a
//! [`ContainerHandle`] for lifecycle transitions and for the current state of
//! a container, and only touches cgroups through the writer.

pub mod linux;
pub mod memory;

use retune_common::config::RetuneConfig;
use retune_common::error::Result;
use retune_common::types::{ContainerId, ContainerState, UpdateRequest};

use crate::exec::ExecOutput;
use crate::state::StateEntry;

pub use linux::LinuxNativeBackend;
pub use memory::MemoryBackend;

/// Configuration for creating a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Human-readable container name.
    pub name: String,
    /// Command to execute inside the container.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Initial resource limits, resolved against the configured defaults.
    pub resources: UpdateRequest,
}

/// Information about a tracked container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Unique identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// PID of the init process (if running).
    pub pid: Option<u32>,
    /// Command the container runs.
    pub command: Vec<String>,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

impl From<&StateEntry> for ContainerInfo {
    fn from(entry: &StateEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            state: entry.state,
            pid: entry.pid,
            command: entry.command.clone(),
            created_at: entry.created_at.clone(),
        }
    }
}

/// Lifecycle operations the resource subsystem relies on.
///
/// Implementors own container processes and their cgroup directories. They
/// never write resource control files; that is the update path's job.
pub trait ContainerHandle: Send + Sync + std::fmt::Debug {
    /// Creates a container from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created.
    fn create(&self, config: &ContainerConfig) -> Result<ContainerId>;

    /// Starts a previously created or stopped container, returning its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, is already running,
    /// or its process cannot be spawned.
    fn start(&self, id: &ContainerId) -> Result<u32>;

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist or cannot be
    /// signaled.
    fn stop(&self, id: &ContainerId) -> Result<()>;

    /// Removes a container that is not running.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, is still running,
    /// or its cgroups cannot be removed.
    fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Returns the current lifecycle state. Unknown containers are reported
    /// as [`ContainerState::Removed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lifecycle index cannot be read.
    fn state(&self, id: &ContainerId) -> Result<ContainerState>;

    /// Executes a command inside a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running or the command
    /// cannot be launched.
    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput>;

    /// Lists all tracked containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot retrieve state.
    fn list(&self) -> Result<Vec<ContainerInfo>>;

    /// Returns whether this backend is operational on the current host.
    fn is_available(&self) -> bool;
}

/// Creates the backend used by the `retune` binary.
#[must_use]
pub fn detect_backend(config: &RetuneConfig) -> Box<dyn ContainerHandle> {
    Box::new(LinuxNativeBackend::new(config))
}
