//! Resolution of partial update requests into complete resource limits.
//!
//! [`resolve`] is pure: it only looks at the committed limits and the
//! request, and never touches the kernel or the store. A request that
//! raises memory past the current memory+swap ceiling without mentioning
//! swap gets its swap ceiling raised to match; a request that clears memory
//! without mentioning swap gets swap cleared too. An explicit swap value is
//! never adjusted, only accepted or rejected.

use retune_common::constants::{MIN_CPU_QUOTA_US, MIN_MEMORY_BYTES, V1_MEMORY_UNLIMITED};
use retune_common::error::{Result, RetuneError};
use retune_common::types::{ControlKey, FieldUpdate, Limit, ResourceLimits, UpdateRequest};

/// Produces the target limits for `request` applied on top of `current`.
///
/// # Errors
///
/// Returns [`RetuneError::InvalidResourceSpec`] when a value is negative
/// (other than `-1`), below the controller's minimum, or when the resulting
/// memory/memory+swap pair cannot be enforced.
pub fn resolve(current: &ResourceLimits, request: &UpdateRequest) -> Result<ResourceLimits> {
    let memory = resolve_field(ControlKey::Memory, current.memory, request.memory)?;
    let cpu_quota = resolve_field(ControlKey::CpuQuota, current.cpu_quota, request.cpu_quota)?;
    let memory_swap = if request.memory_swap.is_keep() {
        follow_memory(current, memory)
    } else {
        resolve_field(ControlKey::MemorySwap, current.memory_swap, request.memory_swap)?
    };

    let target = ResourceLimits {
        memory,
        memory_swap,
        cpu_quota,
    };
    check_pairing(&target)?;
    Ok(target)
}

fn resolve_field(key: ControlKey, current: Limit, update: FieldUpdate) -> Result<Limit> {
    let limit = match update {
        FieldUpdate::Keep => return Ok(current),
        FieldUpdate::Clear => Limit::Unlimited,
        FieldUpdate::Set(raw) => Limit::from_api(raw)
            .map_err(|_| RetuneError::invalid_spec(format!("{key}: {raw} is not a valid value (use -1 for unlimited)")))?,
    };
    check_minimum(key, limit)?;
    check_maximum(key, limit)?;
    Ok(limit)
}

/// The memory controller cannot hold a ceiling at or above its own
/// "unlimited" value; such a write would read back as unlimited.
fn check_maximum(key: ControlKey, limit: Limit) -> Result<()> {
    match (key, limit) {
        (ControlKey::Memory | ControlKey::MemorySwap, Limit::Finite(value)) if value >= V1_MEMORY_UNLIMITED => {
            Err(RetuneError::invalid_spec(format!(
                "{key}: {value} is not below the kernel maximum of {V1_MEMORY_UNLIMITED} (use -1 for unlimited)"
            )))
        }
        _ => Ok(()),
    }
}

fn check_minimum(key: ControlKey, limit: Limit) -> Result<()> {
    let minimum = match key {
        ControlKey::Memory => MIN_MEMORY_BYTES,
        ControlKey::CpuQuota => MIN_CPU_QUOTA_US,
        ControlKey::MemorySwap => return Ok(()),
    };
    match limit {
        Limit::Finite(value) if value < minimum => Err(RetuneError::invalid_spec(format!(
            "{key}: {value} is below the minimum of {minimum}"
        ))),
        _ => Ok(()),
    }
}

/// Swap ceiling to use when the request leaves swap unspecified.
fn follow_memory(current: &ResourceLimits, memory: Limit) -> Limit {
    if memory == current.memory {
        return current.memory_swap;
    }
    match (memory, current.memory_swap) {
        (Limit::Unlimited, Limit::Finite(_)) => Limit::Unlimited,
        (Limit::Finite(memory), Limit::Finite(swap)) if swap < memory => Limit::Finite(memory),
        (_, swap) => swap,
    }
}

fn check_pairing(target: &ResourceLimits) -> Result<()> {
    if target.swap_invariant_holds() {
        return Ok(());
    }
    match (target.memory, target.memory_swap) {
        (Limit::Unlimited, swap) => Err(RetuneError::invalid_spec(format!(
            "a memory limit is required when the memory+swap limit is set ({swap})"
        ))),
        (memory, swap) => Err(RetuneError::invalid_spec(format!(
            "memory+swap limit {swap} must be at least the memory limit {memory}"
        ))),
    }
}
