//! Versioned store of committed resource limits.
//!
//! Each container's record carries a version that increases by one on every
//! commit. A commit names the version it was computed from and is refused
//! with [`RetuneError::ConcurrentModification`] if the record moved on in the
//! meantime, so no writer can overwrite a change it never saw.
//!
//! Records are guarded individually: readers of one container never wait on
//! a commit to another, and a reader of the committing container sees either
//! the previous version or the new one.
//!
//! When opened on a directory, every commit is written to
//! `<dir>/<container_id>.json` before it becomes visible. Several processes
//! may share the directory: reads pick up newer records written by others,
//! and the version check and write of a commit run under an exclusive
//! `flock` on `<dir>/.lock`.
//!
//! Removed records leave a tombstone behind so that a late update can tell
//! "removed" apart from "never existed".

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ResourceLimits};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

const LOCK_FILE_NAME: &str = ".lock";

/// A committed configuration and its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Versioned {
    /// The committed limits.
    pub limits: ResourceLimits,
    /// Commit counter, starting at 1 on registration.
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    id: ContainerId,
    version: u64,
    limits: ResourceLimits,
}

#[derive(Debug)]
struct Slot {
    current: Versioned,
    removed: bool,
}

type SlotRef = Arc<RwLock<Slot>>;

/// Holds the authoritative resource configuration of every container.
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: RwLock<HashMap<ContainerId, SlotRef>>,
    dir: Option<PathBuf>,
}

impl ConfigStore {
    /// Creates a store that keeps records in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a persistent store, loading every record found in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or read, or a
    /// record cannot be parsed.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| RetuneError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let read_dir = std::fs::read_dir(dir).map_err(|e| RetuneError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut entries = HashMap::new();
        for item in read_dir {
            let path = item
                .map_err(|e| RetuneError::Io {
                    path: dir.to_path_buf(),
                    source: e,
                })?
                .path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let record = read_record_file(&path)?;
            let slot = Slot {
                current: Versioned {
                    limits: record.limits,
                    version: record.version,
                },
                removed: false,
            };
            let _ = entries.insert(record.id, Arc::new(RwLock::new(slot)));
        }
        tracing::debug!(dir = %dir.display(), records = entries.len(), "config store opened");
        Ok(Self {
            entries: RwLock::new(entries),
            dir: Some(dir.to_path_buf()),
        })
    }

    /// Registers a new container at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::Config`] if the container is already
    /// registered, [`RetuneError::InvalidResourceSpec`] if the limits break
    /// the memory/swap pairing, or an I/O error if persisting fails.
    pub fn insert(&self, id: &ContainerId, limits: ResourceLimits) -> Result<Versioned> {
        check_invariant(&limits)?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(id).is_some_and(is_live) {
            return Err(RetuneError::Config {
                message: format!("container {id} already has a resource record"),
            });
        }
        let versioned = Versioned { limits, version: 1 };
        let _lock = self.lock_records()?;
        self.persist(id, versioned)?;
        let slot = Slot {
            current: versioned,
            removed: false,
        };
        let _ = entries.insert(id.clone(), Arc::new(RwLock::new(slot)));
        Ok(versioned)
    }

    /// Returns the latest committed version, including one committed by
    /// another process sharing the directory.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::NotFound`] if the container has no record, or
    /// an error if the persisted record cannot be read.
    pub fn get(&self, id: &ContainerId) -> Result<Versioned> {
        let slot = self.slot(id)?;
        let cached = {
            let slot = slot.read().unwrap_or_else(PoisonError::into_inner);
            if slot.removed {
                return Err(not_found(id));
            }
            slot.current
        };
        let Some(on_disk) = self.read_persisted(id)? else {
            return Ok(cached);
        };
        if on_disk.version <= cached.version {
            return Ok(cached);
        }

        let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.removed {
            return Err(not_found(id));
        }
        if on_disk.version > slot.current.version {
            tracing::debug!(id = %id, version = on_disk.version, "newer record on disk, refreshing");
            slot.current = on_disk;
        }
        Ok(slot.current)
    }

    /// Returns `true` if the container has a live record.
    #[must_use]
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(is_live)
    }

    /// Returns `true` if the container had a record that was removed.
    #[must_use]
    pub fn was_removed(&self, id: &ContainerId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|slot| !is_live(slot))
    }

    /// Replaces the record if it is still at `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`RetuneError::ConcurrentModification`] if the record moved on.
    /// - [`RetuneError::NotFound`] if the record was removed.
    /// - [`RetuneError::InvalidResourceSpec`] if the limits break the
    ///   memory/swap pairing.
    /// - An I/O error if persisting fails; the visible record is unchanged.
    pub fn commit(&self, id: &ContainerId, limits: ResourceLimits, expected_version: u64) -> Result<Versioned> {
        check_invariant(&limits)?;
        let slot = self.slot(id)?;
        let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.removed {
            return Err(not_found(id));
        }
        if slot.current.version != expected_version {
            return Err(RetuneError::ConcurrentModification {
                id: id.clone(),
                expected: expected_version,
                found: slot.current.version,
            });
        }
        let _lock = self.lock_records()?;
        if let Some(on_disk) = self.read_persisted(id)? {
            if on_disk.version != slot.current.version {
                tracing::debug!(id = %id, version = on_disk.version, "record changed on disk, refreshing");
                slot.current = on_disk;
                return Err(RetuneError::ConcurrentModification {
                    id: id.clone(),
                    expected: expected_version,
                    found: on_disk.version,
                });
            }
        }

        let next = Versioned {
            limits,
            version: slot.current.version + 1,
        };
        self.persist(id, next)?;
        slot.current = next;
        tracing::debug!(id = %id, version = next.version, "resource record committed");
        Ok(next)
    }

    /// Drops a container's record, leaving a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::NotFound`] if there is no live record, or an
    /// I/O error if the persisted record cannot be deleted.
    pub fn remove(&self, id: &ContainerId) -> Result<()> {
        let slot = self.slot(id)?;
        {
            let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
            if slot.removed {
                return Err(not_found(id));
            }
            slot.removed = true;
        }

        let _lock = self.lock_records()?;
        if let Some(path) = self.record_path(id)? {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RetuneError::Io { path, source: e }),
            }
        }
        Ok(())
    }

    /// IDs of every container with a record.
    #[must_use]
    pub fn ids(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| is_live(slot))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn slot(&self, id: &ContainerId) -> Result<SlotRef> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn record_path(&self, id: &ContainerId) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let name = id.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(RetuneError::Config {
                message: format!("container id {name:?} cannot be used as a file name"),
            });
        }
        Ok(Some(dir.join(format!("{name}.json"))))
    }

    /// Takes the directory-wide write lock; `None` for in-memory stores.
    fn lock_records(&self) -> Result<Option<Flock<File>>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| RetuneError::Io {
                path: path.clone(),
                source: e,
            })?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map(Some)
            .map_err(|(_, errno)| RetuneError::Io {
                path,
                source: errno.into(),
            })
    }

    fn persist(&self, id: &ContainerId, versioned: Versioned) -> Result<()> {
        let Some(path) = self.record_path(id)? else {
            return Ok(());
        };
        let record = Record {
            id: id.clone(),
            version: versioned.version,
            limits: versioned.limits,
        };
        crate::state::write_atomic(&path, &serde_json::to_vec_pretty(&record)?)
    }

    fn read_persisted(&self, id: &ContainerId) -> Result<Option<Versioned>> {
        let Some(path) = self.record_path(id)? else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let record = read_record_file(&path)?;
        Ok(Some(Versioned {
            limits: record.limits,
            version: record.version,
        }))
    }
}

fn read_record_file(path: &Path) -> Result<Record> {
    let content = std::fs::read_to_string(path).map_err(|e| RetuneError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn is_live(slot: &SlotRef) -> bool {
    !slot.read().unwrap_or_else(PoisonError::into_inner).removed
}

fn check_invariant(limits: &ResourceLimits) -> Result<()> {
    if limits.swap_invariant_holds() {
        Ok(())
    } else {
        Err(RetuneError::invalid_spec(format!(
            "memory+swap limit {} must be at least the memory limit {}",
            limits.memory_swap, limits.memory
        )))
    }
}

fn not_found(id: &ContainerId) -> RetuneError {
    RetuneError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}
