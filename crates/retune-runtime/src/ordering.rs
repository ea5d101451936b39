//! Ordered application of resource limits to the kernel.
//!
//! The kernel checks `memory <= memory+swap` on every individual write, so a
//! transition that moves both ceilings must pick its order: when memory goes
//! up, swap is written first; when memory goes down, memory is written first.
//! Either way the pair is valid after each write. CPU quota is independent
//! and is written last.
//!
//! Writes run on the blocking pool with a per-write timeout. A write that
//! times out is still awaited before control returns, so it can never land
//! after a rollback has started.

use std::time::Duration;

use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ControlKey, Limit, ResourceLimits};
use retune_core::cgroup::CgroupWriter;

/// One control-file write in a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitWrite {
    /// Control being written.
    pub key: ControlKey,
    /// Value enforced before the write.
    pub from: Limit,
    /// Value the write enforces.
    pub to: Limit,
}

/// Computes the writes that move the kernel from `old` to `new`, in an order
/// that keeps `memory <= memory+swap` after every write. Controls whose value
/// does not change are skipped.
#[must_use]
pub fn plan(old: &ResourceLimits, new: &ResourceLimits) -> Vec<LimitWrite> {
    let step = |key| LimitWrite {
        key,
        from: old.get(key),
        to: new.get(key),
    };
    let memory_changed = old.memory != new.memory;
    let swap_changed = old.memory_swap != new.memory_swap;

    let mut steps = Vec::with_capacity(ControlKey::ALL.len());
    match (memory_changed, swap_changed) {
        (true, true) if new.memory > old.memory => {
            steps.push(step(ControlKey::MemorySwap));
            steps.push(step(ControlKey::Memory));
        }
        (true, true) => {
            steps.push(step(ControlKey::Memory));
            steps.push(step(ControlKey::MemorySwap));
        }
        (true, false) => steps.push(step(ControlKey::Memory)),
        (false, true) => steps.push(step(ControlKey::MemorySwap)),
        (false, false) => {}
    }
    if old.cpu_quota != new.cpu_quota {
        steps.push(step(ControlKey::CpuQuota));
    }
    steps
}

/// Returns `base` with the `to` values of `applied` laid over it.
#[must_use]
pub fn overlay(base: &ResourceLimits, applied: &[LimitWrite]) -> ResourceLimits {
    let mut limits = *base;
    for write in applied {
        limits.set(write.key, write.to);
    }
    limits
}

/// A transition that stopped part-way.
#[derive(Debug)]
pub struct ApplyFailure {
    /// Writes that took effect before the failure, in order. Includes the
    /// failed write if it timed out but landed afterwards.
    pub applied: Vec<LimitWrite>,
    /// The write that failed.
    pub failed: LimitWrite,
    /// Why it failed.
    pub error: RetuneError,
}

enum StepOutcome {
    Applied,
    Failed(RetuneError),
    LandedLate(RetuneError),
}

/// Drives planned writes through a [`CgroupWriter`].
#[derive(Debug, Clone)]
pub struct LimitApplier {
    writer: CgroupWriter,
    timeout: Duration,
}

impl LimitApplier {
    /// Creates an applier with a per-write timeout.
    #[must_use]
    pub const fn new(writer: CgroupWriter, timeout: Duration) -> Self {
        Self { writer, timeout }
    }

    /// Returns the underlying writer.
    #[must_use]
    pub const fn writer(&self) -> &CgroupWriter {
        &self.writer
    }

    /// Executes `steps` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyFailure`] carrying the partial-application vector.
    pub async fn apply(
        &self,
        id: &ContainerId,
        steps: &[LimitWrite],
    ) -> std::result::Result<Vec<LimitWrite>, ApplyFailure> {
        let mut applied = Vec::with_capacity(steps.len());
        for step in steps {
            match self.write_step(id, step.key, step.to).await {
                StepOutcome::Applied => applied.push(*step),
                StepOutcome::Failed(error) => {
                    return Err(ApplyFailure {
                        applied,
                        failed: *step,
                        error,
                    });
                }
                StepOutcome::LandedLate(error) => {
                    applied.push(*step);
                    return Err(ApplyFailure {
                        applied,
                        failed: *step,
                        error,
                    });
                }
            }
        }
        Ok(applied)
    }

    /// Restores `old` after `applied` took effect, using the same ordering
    /// rule as a forward transition.
    ///
    /// A write that finds the cgroup gone ends the rollback: there is no
    /// enforcement left to disagree with the committed limits.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::InconsistentState`] if any rollback write fails
    /// for another reason.
    pub async fn rollback(&self, id: &ContainerId, old: &ResourceLimits, applied: &[LimitWrite]) -> Result<()> {
        if applied.is_empty() {
            return Ok(());
        }
        let steps = plan(&overlay(old, applied), old);
        tracing::warn!(id = %id, writes = steps.len(), "rolling back partially applied limits");

        for step in &steps {
            match self.write_step(id, step.key, step.to).await {
                StepOutcome::Applied | StepOutcome::LandedLate(_) => {}
                StepOutcome::Failed(RetuneError::ContainerNotRunning { .. }) => {
                    tracing::debug!(id = %id, "cgroup gone, nothing left to roll back");
                    return Ok(());
                }
                StepOutcome::Failed(error) => {
                    tracing::error!(
                        id = %id,
                        key = %step.key,
                        value = %step.to,
                        error = %error,
                        "rollback failed, kernel limits no longer match committed configuration"
                    );
                    return Err(RetuneError::InconsistentState {
                        id: id.clone(),
                        message: format!("restoring {}={} failed: {error}", step.key, step.to),
                    });
                }
            }
        }
        Ok(())
    }

    /// Reads the values the kernel currently enforces for `id`.
    ///
    /// # Errors
    ///
    /// Returns the writer's read error, or [`RetuneError::IoFailure`] if the
    /// read does not finish within the write timeout.
    pub async fn read_enforced(&self, id: &ContainerId) -> Result<ResourceLimits> {
        let writer = self.writer.clone();
        let task_id = id.clone();
        let task = tokio::task::spawn_blocking(move || writer.read_all(&task_id));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RetuneError::IoFailure {
                id: id.clone(),
                key: ControlKey::Memory,
                message: format!("read task failed: {join_error}"),
            }),
            Err(_) => Err(RetuneError::IoFailure {
                id: id.clone(),
                key: ControlKey::Memory,
                message: format!("read timed out after {:?}", self.timeout),
            }),
        }
    }

    async fn write_step(&self, id: &ContainerId, key: ControlKey, value: Limit) -> StepOutcome {
        let writer = self.writer.clone();
        let task_id = id.clone();
        let mut task = tokio::task::spawn_blocking(move || writer.write(&task_id, key, value));

        if let Ok(joined) = tokio::time::timeout(self.timeout, &mut task).await {
            return match joined {
                Ok(Ok(())) => StepOutcome::Applied,
                Ok(Err(error)) => StepOutcome::Failed(error),
                Err(join_error) => StepOutcome::Failed(RetuneError::IoFailure {
                    id: id.clone(),
                    key,
                    message: format!("write task failed: {join_error}"),
                }),
            };
        }

        tracing::warn!(
            id = %id,
            key = %key,
            timeout = ?self.timeout,
            "cgroup write timed out, waiting for it to settle"
        );
        let error = RetuneError::IoFailure {
            id: id.clone(),
            key,
            message: format!("write timed out after {:?}", self.timeout),
        };
        match task.await {
            Ok(Ok(())) => StepOutcome::LandedLate(error),
            _ => StepOutcome::Failed(error),
        }
    }
}
