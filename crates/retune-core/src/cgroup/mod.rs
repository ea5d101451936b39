//! Cgroup control-file access.
//!
//! Resource ceilings are enforced through the legacy (v1) hierarchy, where
//! the memory controller exposes a separate memory+swap ceiling and refuses
//! any write that would leave `memory.limit_in_bytes` above
//! `memory.memsw.limit_in_bytes`. Each container owns one group per
//! controller at `<root>/<controller>/<parent>/<container_id>`.

pub mod cpu;
pub mod memory;
pub mod simulated;
pub mod writer;

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ControlKey};

pub use simulated::SimulatedCgroupFs;
pub use writer::CgroupWriter;

/// Cgroup v1 controllers used by Retune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    /// The `memory` controller.
    Memory,
    /// The `cpu` controller (CFS bandwidth).
    Cpu,
}

impl Controller {
    /// Every controller a container group is created under.
    pub const ALL: [Self; 2] = [Self::Memory, Self::Cpu];

    /// Directory name of the controller's hierarchy.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Cpu => "cpu",
        }
    }
}

/// Returns the controller that owns a control.
#[must_use]
pub const fn controller_of(key: ControlKey) -> Controller {
    match key {
        ControlKey::Memory | ControlKey::MemorySwap => Controller::Memory,
        ControlKey::CpuQuota => Controller::Cpu,
    }
}

/// Returns the control file name for a control.
#[must_use]
pub const fn control_file(key: ControlKey) -> &'static str {
    match key {
        ControlKey::Memory => "memory.limit_in_bytes",
        ControlKey::MemorySwap => "memory.memsw.limit_in_bytes",
        ControlKey::CpuQuota => "cpu.cfs_quota_us",
    }
}

/// Path-addressed key/value surface of the cgroup filesystem.
///
/// Reads return the currently enforced value as text. Writes either succeed
/// or fail with the kernel's error; implementations never retry.
pub trait CgroupFs: Send + Sync + fmt::Debug {
    /// Reads the raw text of a control file.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, e.g. `NotFound` when the
    /// container's cgroup no longer exists.
    fn read(&self, id: &ContainerId, key: ControlKey) -> io::Result<String>;

    /// Writes raw text to a control file.
    ///
    /// # Errors
    ///
    /// Returns the kernel's error for the write.
    fn write(&self, id: &ContainerId, key: ControlKey, value: &str) -> io::Result<()>;
}

/// Location of container groups inside the cgroup filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupLayout {
    root: PathBuf,
    parent: String,
}

impl CgroupLayout {
    /// Creates a layout rooted at `root`, grouping containers under `parent`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, parent: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            parent: parent.into(),
        }
    }

    /// Mount point of one controller's hierarchy.
    #[must_use]
    pub fn controller_dir(&self, controller: Controller) -> PathBuf {
        self.root.join(controller.dir_name())
    }

    /// Directory of a container's group under one controller.
    #[must_use]
    pub fn group_dir(&self, controller: Controller, id: &ContainerId) -> PathBuf {
        self.controller_dir(controller)
            .join(&self.parent)
            .join(id.as_str())
    }

    /// Full path of a control file.
    #[must_use]
    pub fn control_path(&self, id: &ContainerId, key: ControlKey) -> PathBuf {
        self.group_dir(controller_of(key), id).join(control_file(key))
    }
}

/// [`CgroupFs`] backed by the host's mounted cgroup hierarchy.
#[derive(Debug, Clone)]
pub struct HostCgroupFs {
    layout: CgroupLayout,
}

impl HostCgroupFs {
    /// Creates a host filesystem accessor for the given layout.
    #[must_use]
    pub const fn new(layout: CgroupLayout) -> Self {
        Self { layout }
    }

    /// Returns the layout this accessor resolves paths with.
    #[must_use]
    pub const fn layout(&self) -> &CgroupLayout {
        &self.layout
    }
}

impl CgroupFs for HostCgroupFs {
    fn read(&self, id: &ContainerId, key: ControlKey) -> io::Result<String> {
        std::fs::read_to_string(self.layout.control_path(id, key))
    }

    fn write(&self, id: &ContainerId, key: ControlKey, value: &str) -> io::Result<()> {
        // Never create: a missing file means the group is gone.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(self.layout.control_path(id, key))?;
        file.write_all(value.as_bytes())
    }
}

/// Creates and tears down the per-controller groups of one container.
#[derive(Debug)]
pub struct CgroupManager {
    layout: CgroupLayout,
    id: ContainerId,
}

impl CgroupManager {
    /// Creates a group for the container under every controller.
    ///
    /// # Errors
    ///
    /// Returns an error if a group directory cannot be created.
    pub fn create(layout: CgroupLayout, id: ContainerId) -> Result<Self> {
        for controller in Controller::ALL {
            let path = layout.group_dir(controller, &id);
            std::fs::create_dir_all(&path).map_err(|e| RetuneError::Io {
                path: path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %path.display(), "cgroup created");
        }
        tracing::info!(id = %id, "container cgroups created");
        Ok(Self { layout, id })
    }

    /// Re-attaches to the groups of an existing container without touching
    /// the filesystem.
    #[must_use]
    pub const fn open(layout: CgroupLayout, id: ContainerId) -> Self {
        Self { layout, id }
    }

    /// Moves a process into every group of this container.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        for controller in Controller::ALL {
            let procs_path = self.layout.group_dir(controller, &self.id).join("cgroup.procs");
            write_file(&procs_path, &pid.to_string())?;
        }
        tracing::debug!(id = %self.id, pid, "added process to cgroups");
        Ok(())
    }

    /// Returns `true` while the memory group still exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.layout.group_dir(Controller::Memory, &self.id).exists()
    }

    /// Removes every group of this container. Groups that are already gone
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a group directory cannot be removed, for example
    /// because processes are still attached.
    pub fn destroy(&self) -> Result<()> {
        for controller in Controller::ALL {
            let path = self.layout.group_dir(controller, &self.id);
            // cgroupfs only supports rmdir; its control files cannot be unlinked.
            match std::fs::remove_dir(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(RetuneError::Io { path, source: e }),
            }
        }
        tracing::info!(id = %self.id, "container cgroups destroyed");
        Ok(())
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| RetuneError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(content.as_bytes()).map_err(|e| RetuneError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
