//! In-memory emulation of the v1 memory and CPU controllers.
//!
//! Enforces the same per-write checks the kernel does (memory may never
//! exceed memory+swap, CFS quota has a 1 ms floor) and reports unlimited
//! values the way the kernel does. Used by tests and for running the
//! runtime on hosts without a v1 hierarchy. Supports fault injection and
//! records every successful write so callers can assert write order.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use retune_common::constants::{MIN_CPU_QUOTA_US, V1_MEMORY_UNLIMITED};
use retune_common::types::{ContainerId, ControlKey};

use super::CgroupFs;

/// A successful write observed by the emulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Container written.
    pub id: ContainerId,
    /// Control written.
    pub key: ControlKey,
    /// Raw text written.
    pub value: String,
}

#[derive(Debug, Clone, Copy)]
struct Group {
    memory: u64,
    memsw: u64,
    quota: i64,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            memory: V1_MEMORY_UNLIMITED,
            memsw: V1_MEMORY_UNLIMITED,
            quota: -1,
        }
    }
}

#[derive(Debug)]
struct Fault {
    key: ControlKey,
    errno: i32,
    skip: usize,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    groups: HashMap<ContainerId, Group>,
    faults: Vec<Fault>,
    delays: HashMap<ControlKey, Duration>,
    log: Vec<WriteRecord>,
}

/// [`CgroupFs`] that keeps cgroup state in memory.
#[derive(Debug, Default)]
pub struct SimulatedCgroupFs {
    state: Mutex<State>,
}

impl SimulatedCgroupFs {
    /// Creates an emulation with no containers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the container's groups with unlimited ceilings.
    pub fn add_container(&self, id: &ContainerId) {
        let _ = self.lock().groups.entry(id.clone()).or_default();
    }

    /// Removes the container's groups; later accesses fail with `ENOENT`.
    pub fn remove_container(&self, id: &ContainerId) {
        let _ = self.lock().groups.remove(id);
    }

    /// Returns `true` if the container's groups exist.
    #[must_use]
    pub fn contains(&self, id: &ContainerId) -> bool {
        self.lock().groups.contains_key(id)
    }

    /// Fails the next write to `key` with `errno`.
    pub fn fail_next_write(&self, key: ControlKey, errno: i32) {
        self.lock().faults.push(Fault {
            key,
            errno,
            skip: 0,
            remaining: Some(1),
        });
    }

    /// Fails every write to `key` with `errno` until faults are cleared.
    pub fn fail_all_writes(&self, key: ControlKey, errno: i32) {
        self.lock().faults.push(Fault {
            key,
            errno,
            skip: 0,
            remaining: None,
        });
    }

    /// Lets `successes` more writes to `key` through, then fails every
    /// later one with `errno` until faults are cleared.
    pub fn fail_after(&self, key: ControlKey, successes: usize, errno: i32) {
        self.lock().faults.push(Fault {
            key,
            errno,
            skip: successes,
            remaining: None,
        });
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Makes every write to `key` take at least `delay` before it lands.
    pub fn delay_writes(&self, key: ControlKey, delay: Duration) {
        let _ = self.lock().delays.insert(key, delay);
    }

    /// Successful writes in the order they landed.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().log.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.lock().log.clear();
    }
}

impl CgroupFs for SimulatedCgroupFs {
    fn read(&self, id: &ContainerId, key: ControlKey) -> io::Result<String> {
        let state = self.lock();
        let group = state
            .groups
            .get(id)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        let text = match key {
            ControlKey::Memory => group.memory.to_string(),
            ControlKey::MemorySwap => group.memsw.to_string(),
            ControlKey::CpuQuota => group.quota.to_string(),
        };
        Ok(format!("{text}\n"))
    }

    fn write(&self, id: &ContainerId, key: ControlKey, value: &str) -> io::Result<()> {
        let delay = self.lock().delays.get(&key).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        if !state.groups.contains_key(id) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        if let Some(errno) = take_fault(&mut state.faults, key) {
            return Err(io::Error::from_raw_os_error(errno));
        }

        let group = state.groups.entry(id.clone()).or_default();
        match key {
            ControlKey::Memory => {
                let bytes = parse_memory(value)?;
                if bytes > group.memsw {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
                group.memory = bytes;
            }
            ControlKey::MemorySwap => {
                let bytes = parse_memory(value)?;
                if bytes < group.memory {
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
                group.memsw = bytes;
            }
            ControlKey::CpuQuota => {
                let quota = parse_quota(value)?;
                group.quota = quota;
            }
        }
        state.log.push(WriteRecord {
            id: id.clone(),
            key,
            value: value.to_string(),
        });
        Ok(())
    }
}

fn take_fault(faults: &mut Vec<Fault>, key: ControlKey) -> Option<i32> {
    let index = faults.iter().position(|f| f.key == key)?;
    if faults[index].skip > 0 {
        faults[index].skip -= 1;
        return None;
    }
    let errno = faults[index].errno;
    if let Some(remaining) = faults[index].remaining.as_mut() {
        *remaining -= 1;
        if *remaining == 0 {
            let _ = faults.remove(index);
        }
    }
    Some(errno)
}

fn parse_memory(value: &str) -> io::Result<u64> {
    match value.trim().parse::<i64>() {
        Ok(-1) => Ok(V1_MEMORY_UNLIMITED),
        Ok(bytes) if bytes >= 0 => Ok(bytes.unsigned_abs().min(V1_MEMORY_UNLIMITED)),
        _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
    }
}

fn parse_quota(value: &str) -> io::Result<i64> {
    match value.trim().parse::<i64>() {
        Ok(-1) => Ok(-1),
        Ok(micros) if micros > 0 && micros.unsigned_abs() >= MIN_CPU_QUOTA_US => Ok(micros),
        _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
    }
}
