//! Single-value cgroup writes with failure classification.
//!
//! Every write touches exactly one control file of exactly one container.
//! The kernel's errno is mapped onto the workspace error taxonomy so callers
//! can tell a vanished container from a refused value from a transient
//! failure. Nothing here retries.

use std::io;
use std::sync::Arc;

use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ControlKey, Limit, ResourceLimits};

use super::{CgroupFs, cpu, memory};

/// Applies and reads resource values through a [`CgroupFs`].
#[derive(Debug, Clone)]
pub struct CgroupWriter {
    fs: Arc<dyn CgroupFs>,
}

impl CgroupWriter {
    /// Creates a writer over the given filesystem.
    #[must_use]
    pub fn new(fs: Arc<dyn CgroupFs>) -> Self {
        Self { fs }
    }

    /// Writes one value to one control of one container.
    ///
    /// # Errors
    ///
    /// - [`RetuneError::ContainerNotRunning`] if the cgroup is gone.
    /// - [`RetuneError::KernelRejected`] if the kernel refused the value.
    /// - [`RetuneError::IoFailure`] for any other failure.
    pub fn write(&self, id: &ContainerId, key: ControlKey, value: Limit) -> Result<()> {
        let text = encode(key, value);
        match self.fs.write(id, key, &text) {
            Ok(()) => {
                tracing::debug!(id = %id, key = %key, value = %text, "cgroup value written");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(id = %id, key = %key, value = %text, error = %e, "cgroup write failed");
                Err(classify(id, key, value, e))
            }
        }
    }

    /// Reads the value currently enforced for one control.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::ContainerNotRunning`] if the cgroup is gone and
    /// [`RetuneError::IoFailure`] if the file cannot be read or parsed.
    pub fn read(&self, id: &ContainerId, key: ControlKey) -> Result<Limit> {
        let text = self.fs.read(id, key).map_err(|e| {
            if is_gone(&e) {
                RetuneError::ContainerNotRunning { id: id.clone() }
            } else {
                RetuneError::IoFailure {
                    id: id.clone(),
                    key,
                    message: e.to_string(),
                }
            }
        })?;
        decode(key, &text).ok_or_else(|| RetuneError::IoFailure {
            id: id.clone(),
            key,
            message: format!("unexpected content {:?}", text.trim()),
        })
    }

    /// Reads every control of a container.
    ///
    /// # Errors
    ///
    /// Fails on the first control that cannot be read.
    pub fn read_all(&self, id: &ContainerId) -> Result<ResourceLimits> {
        let mut limits = ResourceLimits::default();
        for key in ControlKey::ALL {
            limits.set(key, self.read(id, key)?);
        }
        Ok(limits)
    }
}

/// Text written to the control file of `key`.
#[must_use]
pub fn encode(key: ControlKey, value: Limit) -> String {
    match key {
        ControlKey::Memory | ControlKey::MemorySwap => memory::encode(value),
        ControlKey::CpuQuota => cpu::encode(value),
    }
}

/// Parses the text read from the control file of `key`.
#[must_use]
pub fn decode(key: ControlKey, text: &str) -> Option<Limit> {
    match key {
        ControlKey::Memory | ControlKey::MemorySwap => memory::decode(text),
        ControlKey::CpuQuota => cpu::decode(text),
    }
}

/// Maps a failed write onto the error taxonomy.
#[must_use]
pub fn classify(id: &ContainerId, key: ControlKey, value: Limit, err: io::Error) -> RetuneError {
    if is_gone(&err) {
        return RetuneError::ContainerNotRunning { id: id.clone() };
    }
    match err.raw_os_error() {
        Some(libc::EINVAL | libc::EBUSY) => RetuneError::KernelRejected {
            id: id.clone(),
            key,
            value,
            source: err,
        },
        _ => RetuneError::IoFailure {
            id: id.clone(),
            key,
            message: err.to_string(),
        },
    }
}

fn is_gone(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
        || matches!(err.raw_os_error(), Some(libc::ENOENT | libc::ENODEV | libc::ESRCH))
}
