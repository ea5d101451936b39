//! Domain primitive types used across the Retune workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RetuneError;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container has been created but not yet started.
    Created,
    /// Container is actively running.
    Running,
    /// Container has been stopped.
    Stopped,
    /// Container has been removed; nothing is left to enforce against.
    Removed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// The resource controls that can be changed on a live container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlKey {
    /// RAM-only ceiling.
    Memory,
    /// Combined RAM plus swap ceiling.
    MemorySwap,
    /// CFS bandwidth quota per period.
    CpuQuota,
}

impl ControlKey {
    /// Every control, in declaration order.
    pub const ALL: [Self; 3] = [Self::Memory, Self::MemorySwap, Self::CpuQuota];

    /// Stable name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory-limit",
            Self::MemorySwap => "memory-swap-limit",
            Self::CpuQuota => "cpu-quota",
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single resource ceiling.
///
/// `Finite` sorts below `Unlimited`, so comparisons read naturally when
/// deciding whether a ceiling is being raised or lowered. At the API
/// boundary the value is an `i64` where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Limit {
    /// An explicit ceiling (bytes or microseconds, depending on the control).
    Finite(u64),
    /// No ceiling.
    #[default]
    Unlimited,
}

impl Limit {
    /// Sentinel used at the interface boundary for "no limit".
    pub const UNLIMITED_SENTINEL: i64 = -1;

    /// Converts an interface value into a limit.
    ///
    /// `-1` and `0` both mean "no explicit limit".
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::InvalidResourceSpec`] for negative values other
    /// than `-1`.
    pub fn from_api(value: i64) -> Result<Self, RetuneError> {
        match value {
            Self::UNLIMITED_SENTINEL | 0 => Ok(Self::Unlimited),
            v if v > 0 => Ok(Self::Finite(v.unsigned_abs())),
            v => Err(RetuneError::invalid_spec(format!(
                "negative value {v} is not allowed (use -1 for unlimited)"
            ))),
        }
    }

    /// Converts back to the interface representation.
    #[must_use]
    pub fn as_api(self) -> i64 {
        match self {
            Self::Finite(v) => i64::try_from(v).unwrap_or(i64::MAX),
            Self::Unlimited => Self::UNLIMITED_SENTINEL,
        }
    }

    /// Returns the finite value, if any.
    #[must_use]
    pub const fn finite(self) -> Option<u64> {
        match self {
            Self::Finite(v) => Some(v),
            Self::Unlimited => None,
        }
    }

    /// Returns `true` when there is no ceiling.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        limit.as_api()
    }
}

impl TryFrom<i64> for Limit {
    type Error = RetuneError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_api(value)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(v) => write!(f, "{v}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// The authoritative resource configuration of one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceLimits {
    /// RAM ceiling in bytes.
    pub memory: Limit,
    /// RAM plus swap ceiling in bytes.
    pub memory_swap: Limit,
    /// CPU quota in microseconds per period.
    pub cpu_quota: Limit,
}

impl ResourceLimits {
    /// Returns the value of one control.
    #[must_use]
    pub const fn get(&self, key: ControlKey) -> Limit {
        match key {
            ControlKey::Memory => self.memory,
            ControlKey::MemorySwap => self.memory_swap,
            ControlKey::CpuQuota => self.cpu_quota,
        }
    }

    /// Replaces the value of one control.
    pub const fn set(&mut self, key: ControlKey, value: Limit) {
        match key {
            ControlKey::Memory => self.memory = value,
            ControlKey::MemorySwap => self.memory_swap = value,
            ControlKey::CpuQuota => self.cpu_quota = value,
        }
    }

    /// Checks the memory/swap pairing the kernel enforces: a finite swap
    /// ceiling needs a finite memory ceiling no larger than itself.
    #[must_use]
    pub fn swap_invariant_holds(&self) -> bool {
        match (self.memory, self.memory_swap) {
            (_, Limit::Unlimited) => true,
            (Limit::Unlimited, Limit::Finite(_)) => false,
            (Limit::Finite(memory), Limit::Finite(swap)) => swap >= memory,
        }
    }
}

/// How one field of an [`UpdateRequest`] should change.
///
/// Omitting a field and clearing it are different requests: `Keep` leaves
/// the current value alone, `Clear` removes the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldUpdate {
    /// Leave the field unchanged.
    #[default]
    Keep,
    /// Set the field to a raw interface value (validated later).
    Set(i64),
    /// Remove the ceiling.
    Clear,
}

impl FieldUpdate {
    /// Maps an optional interface value onto the tri-state.
    #[must_use]
    pub const fn from_api(value: Option<i64>) -> Self {
        match value {
            None => Self::Keep,
            Some(Limit::UNLIMITED_SENTINEL) => Self::Clear,
            Some(v) => Self::Set(v),
        }
    }

    /// Returns `true` if the field was not mentioned in the request.
    #[must_use]
    pub const fn is_keep(self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// A partial change to a container's resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateRequest {
    /// Change to the memory ceiling.
    pub memory: FieldUpdate,
    /// Change to the memory+swap ceiling.
    pub memory_swap: FieldUpdate,
    /// Change to the CPU quota.
    pub cpu_quota: FieldUpdate,
}

impl UpdateRequest {
    /// Creates a request that changes nothing.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            memory: FieldUpdate::Keep,
            memory_swap: FieldUpdate::Keep,
            cpu_quota: FieldUpdate::Keep,
        }
    }

    /// Builds a request from interface values, where `None` means omitted.
    #[must_use]
    pub const fn from_api(memory: Option<i64>, memory_swap: Option<i64>, cpu_quota: Option<i64>) -> Self {
        Self {
            memory: FieldUpdate::from_api(memory),
            memory_swap: FieldUpdate::from_api(memory_swap),
            cpu_quota: FieldUpdate::from_api(cpu_quota),
        }
    }

    /// Sets the memory ceiling (`-1` clears it).
    #[must_use]
    pub const fn memory(mut self, bytes: i64) -> Self {
        self.memory = FieldUpdate::from_api(Some(bytes));
        self
    }

    /// Sets the memory+swap ceiling (`-1` clears it).
    #[must_use]
    pub const fn memory_swap(mut self, bytes: i64) -> Self {
        self.memory_swap = FieldUpdate::from_api(Some(bytes));
        self
    }

    /// Sets the CPU quota (`-1` clears it).
    #[must_use]
    pub const fn cpu_quota(mut self, micros: i64) -> Self {
        self.cpu_quota = FieldUpdate::from_api(Some(micros));
        self
    }

    /// Returns the requested change for one control.
    #[must_use]
    pub const fn field(&self, key: ControlKey) -> FieldUpdate {
        match key {
            ControlKey::Memory => self.memory,
            ControlKey::MemorySwap => self.memory_swap,
            ControlKey::CpuQuota => self.cpu_quota,
        }
    }

    /// Returns `true` if no field is mentioned.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.memory.is_keep() && self.memory_swap.is_keep() && self.cpu_quota.is_keep()
    }
}
