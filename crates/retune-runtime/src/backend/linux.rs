//! Linux native container backend.
//!
//! Keeps a JSON lifecycle index in the data directory so that separate CLI
//! invocations see the same containers. Each container gets a group under
//! the memory and cpu controllers; its process is spawned on start and moved
//! into those groups.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use retune_common::config::RetuneConfig;
use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ContainerState};
use retune_core::cgroup::{CgroupLayout, CgroupManager, Controller};

use super::{ContainerConfig, ContainerHandle, ContainerInfo};
use crate::exec::ExecOutput;
use crate::state::{StateEntry, StateIndex, load_state, save_state};

const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(50);

/// Backend that runs containers as host processes confined by cgroups.
#[derive(Debug)]
pub struct LinuxNativeBackend {
    state_path: PathBuf,
    layout: CgroupLayout,
    index_lock: Mutex<()>,
}

impl LinuxNativeBackend {
    /// Creates a backend rooted at the configured data directory and cgroup
    /// hierarchy.
    #[must_use]
    pub fn new(config: &RetuneConfig) -> Self {
        Self {
            state_path: config.state_file(),
            layout: CgroupLayout::new(&config.cgroup_root, config.cgroup_parent.clone()),
            index_lock: Mutex::new(()),
        }
    }

    /// Loads the index, applies `f`, and saves it back.
    fn modify<T>(&self, f: impl FnOnce(&mut StateIndex) -> Result<T>) -> Result<T> {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = load_state(&self.state_path)?;
        let out = f(&mut index)?;
        save_state(&self.state_path, &index)?;
        Ok(out)
    }

    fn entry(&self, id: &ContainerId) -> Result<StateEntry> {
        load_state(&self.state_path)?
            .find(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &ContainerId) -> RetuneError {
    RetuneError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

fn nix_pid(pid: u32) -> Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .map(nix::unistd::Pid::from_raw)
        .map_err(|_| RetuneError::Config {
            message: format!("pid {pid} out of range"),
        })
}

fn is_alive(pid: u32) -> bool {
    nix_pid(pid).is_ok_and(|pid| nix::sys::signal::kill(pid, None).is_ok())
}

/// Sends SIGTERM, waits for the grace period, then SIGKILL.
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, kill};

    let target = nix_pid(pid)?;
    if kill(target, Signal::SIGTERM).is_err() {
        return Ok(());
    }
    tracing::debug!(pid, "sent SIGTERM");

    let deadline = Instant::now() + STOP_GRACE;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(());
        }
        std::thread::sleep(STOP_POLL);
    }
    if kill(target, Signal::SIGKILL).is_ok() {
        tracing::info!(pid, "sent SIGKILL");
    }
    Ok(())
}

impl ContainerHandle for LinuxNativeBackend {
    fn create(&self, config: &ContainerConfig) -> Result<ContainerId> {
        if config.command.is_empty() {
            return Err(RetuneError::Config {
                message: "container command is empty".into(),
            });
        }
        let id = ContainerId::generate();
        tracing::info!(id = %id, name = %config.name, "creating container");

        let _ = CgroupManager::create(self.layout.clone(), id.clone())?;
        self.modify(|index| {
            index.containers.push(StateEntry {
                id: id.clone(),
                name: config.name.clone(),
                state: ContainerState::Created,
                pid: None,
                command: config.command.clone(),
                env: config.env.clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
            });
            Ok(())
        })?;
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<u32> {
        let entry = self.entry(id)?;
        if self.state(id)? == ContainerState::Running {
            return Err(RetuneError::Config {
                message: format!("container {id} is already running"),
            });
        }
        let (program, args) = entry.command.split_first().ok_or_else(|| RetuneError::Config {
            message: format!("container {id} has no command"),
        })?;

        // The container outlives this process; it is reaped by init, not us.
        #[allow(clippy::zombie_processes)]
        let child = Command::new(program)
            .args(args)
            .envs(entry.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RetuneError::Io {
                path: program.into(),
                source: e,
            })?;
        let pid = child.id();

        let manager = CgroupManager::open(self.layout.clone(), id.clone());
        if let Err(e) = manager.add_process(pid) {
            let _ = terminate(pid);
            return Err(e);
        }

        self.modify(|index| {
            let entry = index.find_mut(id).ok_or_else(|| not_found(id))?;
            entry.state = ContainerState::Running;
            entry.pid = Some(pid);
            Ok(())
        })?;
        tracing::info!(id = %id, pid, "container started");
        Ok(pid)
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        let entry = self.entry(id)?;
        if let Some(pid) = entry.pid {
            terminate(pid)?;
        }
        self.modify(|index| {
            let entry = index.find_mut(id).ok_or_else(|| not_found(id))?;
            entry.state = ContainerState::Stopped;
            entry.pid = None;
            Ok(())
        })?;
        tracing::info!(id = %id, "container stopped");
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        if self.state(id)? == ContainerState::Running {
            return Err(RetuneError::Config {
                message: format!("container {id} is running; stop it first"),
            });
        }
        CgroupManager::open(self.layout.clone(), id.clone()).destroy()?;
        self.modify(|index| {
            let before = index.containers.len();
            index.containers.retain(|e| e.id != *id);
            if index.containers.len() == before {
                return Err(not_found(id));
            }
            Ok(())
        })?;
        tracing::info!(id = %id, "container removed");
        Ok(())
    }

    fn state(&self, id: &ContainerId) -> Result<ContainerState> {
        let index = load_state(&self.state_path)?;
        Ok(match index.find(id) {
            None => ContainerState::Removed,
            Some(entry) if entry.state == ContainerState::Running => {
                if entry.pid.is_some_and(is_alive) {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                }
            }
            Some(entry) => entry.state,
        })
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        let entry = self.entry(id)?;
        let pid = entry
            .pid
            .filter(|pid| is_alive(*pid))
            .ok_or_else(|| RetuneError::ContainerNotRunning { id: id.clone() })?;
        crate::exec::exec_in_container(id, pid, cmd)
    }

    fn list(&self) -> Result<Vec<ContainerInfo>> {
        let index = load_state(&self.state_path)?;
        let mut infos: Vec<ContainerInfo> = index.containers.iter().map(ContainerInfo::from).collect();
        for info in &mut infos {
            if info.state == ContainerState::Running && !info.pid.is_some_and(is_alive) {
                info.state = ContainerState::Stopped;
            }
        }
        Ok(infos)
    }

    fn is_available(&self) -> bool {
        cfg!(target_os = "linux")
            && Controller::ALL
                .iter()
                .all(|controller| self.layout.controller_dir(*controller).is_dir())
    }
}
