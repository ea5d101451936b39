//! Live resource updates.
//!
//! [`ResourceManager`] is the only writer of resource limits, both in the
//! [`ConfigStore`] and in the kernel. Every update of one container runs
//! under that container's lock and walks the phases
//! `Validating → Applying → Committing`, dropping into `RollingBack` when a
//! write or the commit fails after the kernel has already been touched.
//!
//! Updates run on a detached task. A caller that stops waiting (timeout,
//! dropped future) does not interrupt an update that is already applying,
//! rolling back, or committing; it only stops hearing about the outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use retune_common::config::RetuneConfig;
use retune_common::constants::{DEFAULT_COMMIT_RETRIES, DEFAULT_WRITE_TIMEOUT_MS};
use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ContainerState, ResourceLimits, UpdateRequest};
use retune_core::cgroup::CgroupWriter;

use crate::backend::ContainerHandle;
use crate::lock::LockRegistry;
use crate::ordering::{LimitApplier, plan};
use crate::store::{ConfigStore, Versioned};
use crate::{inspect, validate};

/// Where an update currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Not updating.
    Idle,
    /// Resolving the request against the committed limits.
    Validating,
    /// Writing control files.
    Applying,
    /// Publishing the new version.
    Committing,
    /// Undoing writes after a failure.
    RollingBack,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Applying => "applying",
            Self::Committing => "committing",
            Self::RollingBack => "rolling-back",
        })
    }
}

fn enter(id: &ContainerId, phase: UpdatePhase) {
    tracing::debug!(id = %id, phase = %phase, "update phase");
}

/// Tuning knobs for the update path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSettings {
    /// Upper bound on a single control-file write.
    pub write_timeout: Duration,
    /// Re-validations allowed after a commit conflict.
    pub commit_retries: u32,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            commit_retries: DEFAULT_COMMIT_RETRIES,
        }
    }
}

impl From<&RetuneConfig> for UpdateSettings {
    fn from(config: &RetuneConfig) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            commit_retries: config.commit_retries,
        }
    }
}

/// Owns the update pipeline for every container.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    handles: Arc<dyn ContainerHandle>,
    store: Arc<ConfigStore>,
    applier: LimitApplier,
    locks: LockRegistry,
    commit_retries: u32,
}

impl ResourceManager {
    /// Wires the manager to its collaborators.
    #[must_use]
    pub fn new(
        handles: Arc<dyn ContainerHandle>,
        writer: CgroupWriter,
        store: Arc<ConfigStore>,
        settings: UpdateSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handles,
                store,
                applier: LimitApplier::new(writer, settings.write_timeout),
                locks: LockRegistry::new(),
                commit_retries: settings.commit_retries,
            }),
        }
    }

    /// The store holding committed limits.
    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.inner.store
    }

    /// Records the initial limits of a newly created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container already has a record or the limits
    /// break the memory/swap pairing.
    pub fn register(&self, id: &ContainerId, limits: ResourceLimits) -> Result<Versioned> {
        let versioned = self.inner.store.insert(id, limits)?;
        tracing::debug!(id = %id, memory = %limits.memory, memory_swap = %limits.memory_swap, cpu_quota = %limits.cpu_quota, "resource limits registered");
        Ok(versioned)
    }

    /// Changes the limits of `id` and returns the committed result.
    ///
    /// # Errors
    ///
    /// - [`RetuneError::InvalidResourceSpec`] if the request is malformed;
    ///   nothing was written.
    /// - [`RetuneError::NotFound`] if the container never had a record.
    /// - [`RetuneError::ContainerNotRunning`] if the container was removed,
    ///   or stopped while the update was applying.
    /// - [`RetuneError::KernelRejected`] or [`RetuneError::IoFailure`] if a
    ///   write failed; applied writes were rolled back.
    /// - [`RetuneError::ConcurrentModification`] if commits kept conflicting
    ///   past the retry budget.
    /// - [`RetuneError::InconsistentState`] if a rollback failed.
    pub async fn update(&self, id: &ContainerId, request: UpdateRequest) -> Result<ResourceLimits> {
        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        let task = tokio::spawn(async move { inner.run_update(&task_id, &request).await });
        task.await.map_err(|e| RetuneError::InconsistentState {
            id: id.clone(),
            message: format!("update task aborted: {e}"),
        })?
    }

    /// Committed limits of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::NotFound`] if the container has no record.
    pub fn inspect(&self, id: &ContainerId) -> Result<ResourceLimits> {
        inspect::read(&self.inner.store, id)
    }

    /// Committed limits of `id` with their version.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::NotFound`] if the container has no record.
    pub fn inspect_versioned(&self, id: &ContainerId) -> Result<Versioned> {
        inspect::read_versioned(&self.inner.store, id)
    }

    /// Drives the kernel to the committed limits, e.g. right after start.
    ///
    /// # Errors
    ///
    /// Returns the failing write's error after rolling back, or
    /// [`RetuneError::InconsistentState`] if the rollback failed too.
    pub async fn enforce(&self, id: &ContainerId) -> Result<()> {
        let _guard = self.inner.locks.acquire(id).await;
        self.inner.enforce_locked(id).await
    }

    /// Drops the container's record once in-flight updates have finished,
    /// and releases its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted record cannot be deleted.
    pub async fn forget(&self, id: &ContainerId) -> Result<()> {
        let guard = self.inner.locks.acquire(id).await;
        let result = match self.inner.store.remove(id) {
            Err(RetuneError::NotFound { .. }) => {
                tracing::debug!(id = %id, "no resource record to forget");
                Ok(())
            }
            other => other,
        };
        drop(guard);
        let _ = self.inner.locks.reclaim(id);
        result
    }

    /// Number of containers with a live lock entry.
    #[must_use]
    pub fn live_locks(&self) -> usize {
        self.inner.locks.len()
    }
}

impl Inner {
    async fn run_update(&self, id: &ContainerId, request: &UpdateRequest) -> Result<ResourceLimits> {
        let guard = self.locks.acquire(id).await;
        let mut conflicts = 0;
        let result = loop {
            match self.attempt(id, request).await {
                Err(RetuneError::ConcurrentModification { expected, found, .. }) if conflicts < self.commit_retries => {
                    conflicts += 1;
                    tracing::debug!(id = %id, expected, found, attempt = conflicts, "commit conflict, re-validating");
                }
                other => break other,
            }
        };
        enter(id, UpdatePhase::Idle);
        if !self.store.contains(id) {
            drop(guard);
            let _ = self.locks.reclaim(id);
        }
        result
    }

    async fn attempt(&self, id: &ContainerId, request: &UpdateRequest) -> Result<ResourceLimits> {
        enter(id, UpdatePhase::Validating);
        let current = match self.store.get(id) {
            Err(RetuneError::NotFound { .. }) if self.store.was_removed(id) => {
                return Err(RetuneError::ContainerNotRunning { id: id.clone() });
            }
            other => other?,
        };
        let state = self.handles.state(id)?;
        if state == ContainerState::Removed {
            return Err(RetuneError::ContainerNotRunning { id: id.clone() });
        }
        let target = validate::resolve(&current.limits, request)?;
        if target == current.limits {
            tracing::debug!(id = %id, version = current.version, "limits unchanged");
            return Ok(target);
        }

        if state != ContainerState::Running {
            enter(id, UpdatePhase::Committing);
            let committed = self.store.commit(id, target, current.version)?;
            tracing::info!(id = %id, state = %state, version = committed.version, "resource limits stored, enforced on next start");
            return Ok(committed.limits);
        }

        enter(id, UpdatePhase::Applying);
        let steps = plan(&current.limits, &target);
        let applied = match self.applier.apply(id, &steps).await {
            Ok(applied) => applied,
            Err(failure) => {
                tracing::warn!(id = %id, key = %failure.failed.key, value = %failure.failed.to, error = %failure.error, "limit write failed");
                enter(id, UpdatePhase::RollingBack);
                self.applier.rollback(id, &current.limits, &failure.applied).await?;
                return Err(failure.error);
            }
        };

        if !matches!(self.handles.state(id), Ok(ContainerState::Running)) {
            tracing::warn!(id = %id, "container left running state during update");
            enter(id, UpdatePhase::RollingBack);
            self.applier.rollback(id, &current.limits, &applied).await?;
            return Err(RetuneError::ContainerNotRunning { id: id.clone() });
        }

        enter(id, UpdatePhase::Committing);
        match self.store.commit(id, target, current.version) {
            Ok(committed) => {
                tracing::info!(
                    id = %id,
                    version = committed.version,
                    memory = %target.memory,
                    memory_swap = %target.memory_swap,
                    cpu_quota = %target.cpu_quota,
                    "resource limits updated"
                );
                Ok(committed.limits)
            }
            Err(err @ RetuneError::ConcurrentModification { .. }) => {
                enter(id, UpdatePhase::RollingBack);
                self.resync(id).await?;
                Err(err)
            }
            Err(err) => {
                enter(id, UpdatePhase::RollingBack);
                self.applier.rollback(id, &current.limits, &applied).await?;
                Err(err)
            }
        }
    }

    /// Moves the kernel to whatever is committed now. Used after losing a
    /// commit race, when the kernel may hold a mix of both writers' values.
    async fn resync(&self, id: &ContainerId) -> Result<()> {
        if self.handles.state(id)? != ContainerState::Running {
            return Ok(());
        }
        match self.enforce_locked(id).await {
            Ok(()) | Err(RetuneError::ContainerNotRunning { .. }) => Ok(()),
            Err(err @ RetuneError::InconsistentState { .. }) => Err(err),
            Err(err) => {
                tracing::error!(id = %id, error = %err, "could not restore committed limits after a commit conflict");
                Err(RetuneError::InconsistentState {
                    id: id.clone(),
                    message: format!("restoring committed limits failed: {err}"),
                })
            }
        }
    }

    async fn enforce_locked(&self, id: &ContainerId) -> Result<()> {
        let committed = self.store.get(id)?;
        let enforced = self.applier.read_enforced(id).await?;
        let steps = plan(&enforced, &committed.limits);
        if steps.is_empty() {
            return Ok(());
        }
        tracing::debug!(id = %id, writes = steps.len(), version = committed.version, "enforcing committed limits");
        match self.applier.apply(id, &steps).await {
            Ok(_) => Ok(()),
            Err(failure) => {
                self.applier.rollback(id, &enforced, &failure.applied).await?;
                Err(failure.error)
            }
        }
    }
}
