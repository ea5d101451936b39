//! In-process container backend.
//!
//! Tracks lifecycle state in memory and hands out synthetic PIDs. When wired
//! to a [`SimulatedCgroupFs`], a container's cgroups appear on create and
//! vanish on remove, like the host hierarchy would. Useful for embedding the
//! runtime without root and for exercising the update path in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ContainerState};
use retune_core::cgroup::SimulatedCgroupFs;

use super::{ContainerConfig, ContainerHandle, ContainerInfo};
use crate::exec::ExecOutput;
use crate::state::StateEntry;

const FIRST_PID: u32 = 10_000;

/// [`ContainerHandle`] that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    containers: Mutex<BTreeMap<ContainerId, StateEntry>>,
    cgroups: Option<Arc<SimulatedCgroupFs>>,
    next_pid: AtomicU32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            cgroups: None,
            next_pid: AtomicU32::new(FIRST_PID),
        }
    }
}

impl MemoryBackend {
    /// Creates a backend without cgroups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that manages container groups in `cgroups`.
    #[must_use]
    pub fn with_cgroups(cgroups: Arc<SimulatedCgroupFs>) -> Self {
        Self {
            cgroups: Some(cgroups),
            ..Self::default()
        }
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<ContainerId, StateEntry>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(id: &ContainerId) -> RetuneError {
    RetuneError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

impl ContainerHandle for MemoryBackend {
    fn create(&self, config: &ContainerConfig) -> Result<ContainerId> {
        let id = ContainerId::generate();
        if let Some(cgroups) = &self.cgroups {
            cgroups.add_container(&id);
        }
        let entry = StateEntry {
            id: id.clone(),
            name: config.name.clone(),
            state: ContainerState::Created,
            pid: None,
            command: config.command.clone(),
            env: config.env.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let _ = self.table().insert(id.clone(), entry);
        tracing::info!(id = %id, name = %config.name, "container created (in-memory)");
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<u32> {
        let mut table = self.table();
        let entry = table.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.state == ContainerState::Running {
            return Err(RetuneError::Config {
                message: format!("container {id} is already running"),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        entry.state = ContainerState::Running;
        entry.pid = Some(pid);
        tracing::info!(id = %id, pid, "container started (in-memory)");
        Ok(pid)
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        let mut table = self.table();
        let entry = table.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.state = ContainerState::Stopped;
        entry.pid = None;
        tracing::info!(id = %id, "container stopped (in-memory)");
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let mut table = self.table();
        let entry = table.get(id).ok_or_else(|| not_found(id))?;
        if entry.state == ContainerState::Running {
            return Err(RetuneError::Config {
                message: format!("container {id} is running; stop it first"),
            });
        }
        let _ = table.remove(id);
        drop(table);
        if let Some(cgroups) = &self.cgroups {
            cgroups.remove_container(id);
        }
        tracing::info!(id = %id, "container removed (in-memory)");
        Ok(())
    }

    fn state(&self, id: &ContainerId) -> Result<ContainerState> {
        Ok(self.table().get(id).map_or(ContainerState::Removed, |e| e.state))
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        if self.state(id)? != ContainerState::Running {
            return Err(RetuneError::ContainerNotRunning { id: id.clone() });
        }
        crate::exec::exec_on_host(id, cmd)
    }

    fn list(&self) -> Result<Vec<ContainerInfo>> {
        Ok(self.table().values().map(ContainerInfo::from).collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}
