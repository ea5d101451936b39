//! Runtime engine that ties container lifecycle to resource management.

use std::sync::Arc;

use retune_common::config::RetuneConfig;
use retune_common::error::{Result, RetuneError};
use retune_common::types::{ContainerId, ContainerState, ResourceLimits, UpdateRequest};
use retune_core::cgroup::{CgroupFs, CgroupLayout, CgroupWriter, HostCgroupFs};

use crate::backend::{self, ContainerConfig, ContainerHandle, ContainerInfo};
use crate::exec::ExecOutput;
use crate::inspect::ContainerInspect;
use crate::store::ConfigStore;
use crate::update::{ResourceManager, UpdateSettings};
use crate::validate;

/// The runtime engine that coordinates all container operations.
///
/// Lifecycle calls go to the [`ContainerHandle`]; resource calls go through
/// the [`ResourceManager`]. The engine keeps the two in step: limits are
/// registered on create, enforced on start, and forgotten on remove.
#[derive(Debug)]
pub struct Engine {
    backend: Arc<dyn ContainerHandle>,
    resources: ResourceManager,
    default_limits: ResourceLimits,
}

impl Engine {
    /// Creates an engine on the host: native backend, the mounted cgroup
    /// hierarchy, and a store persisted under the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub fn new(config: &RetuneConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn ContainerHandle> = Arc::from(backend::detect_backend(config));
        let layout = CgroupLayout::new(&config.cgroup_root, config.cgroup_parent.clone());
        let cgroups: Arc<dyn CgroupFs> = Arc::new(HostCgroupFs::new(layout));
        let store = Arc::new(ConfigStore::open(&config.limits_dir())?);
        tracing::debug!(data_dir = %config.data_dir.display(), cgroup_root = %config.cgroup_root.display(), "engine initialized");
        Ok(Self::with_parts(
            backend,
            cgroups,
            store,
            UpdateSettings::from(config),
            config.default_limits,
        ))
    }

    /// Creates an engine from explicit collaborators.
    #[must_use]
    pub fn with_parts(
        backend: Arc<dyn ContainerHandle>,
        cgroups: Arc<dyn CgroupFs>,
        store: Arc<ConfigStore>,
        settings: UpdateSettings,
        default_limits: ResourceLimits,
    ) -> Self {
        let resources = ResourceManager::new(Arc::clone(&backend), CgroupWriter::new(cgroups), store, settings);
        Self {
            backend,
            resources,
            default_limits,
        }
    }

    /// Creates a container and records its initial limits.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::InvalidResourceSpec`] before anything is
    /// created if the requested limits are invalid, or the backend's error.
    pub fn create(&self, config: &ContainerConfig) -> Result<ContainerId> {
        let limits = validate::resolve(&self.default_limits, &config.resources)?;
        let id = self.backend.create(config)?;
        if let Err(e) = self.resources.register(&id, limits) {
            let _ = self.backend.remove(&id);
            return Err(e);
        }
        tracing::info!(id = %id, name = %config.name, "container created");
        Ok(id)
    }

    /// Starts a container and enforces its committed limits.
    ///
    /// A container whose limits cannot be enforced is stopped again.
    ///
    /// # Errors
    ///
    /// Returns the backend's error or the enforcement error.
    pub async fn start(&self, id: &ContainerId) -> Result<u32> {
        let pid = self.backend.start(id)?;
        if let Err(e) = self.resources.enforce(id).await {
            tracing::error!(id = %id, error = %e, "could not enforce limits, stopping container");
            let _ = self.backend.stop(id);
            return Err(e);
        }
        Ok(pid)
    }

    /// Stops a container by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not found or cannot be stopped.
    pub fn stop(&self, id: &ContainerId) -> Result<()> {
        self.backend.stop(id)
    }

    /// Removes a stopped container and its resource record.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is still running or cannot be
    /// removed.
    pub async fn remove(&self, id: &ContainerId) -> Result<()> {
        match self.backend.state(id)? {
            ContainerState::Running => {
                return Err(RetuneError::Config {
                    message: format!("container {id} is running; stop it first"),
                });
            }
            ContainerState::Removed => {
                return Err(RetuneError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                });
            }
            ContainerState::Created | ContainerState::Stopped => {}
        }
        self.resources.forget(id).await?;
        self.backend.remove(id)
    }

    /// Changes the resource limits of a container.
    ///
    /// # Errors
    ///
    /// See [`ResourceManager::update`].
    pub async fn update(&self, id: &ContainerId, request: UpdateRequest) -> Result<ResourceLimits> {
        self.resources.update(id, request).await
    }

    /// Describes a container and its committed limits.
    ///
    /// # Errors
    ///
    /// Returns [`RetuneError::NotFound`] if the container is unknown.
    pub fn inspect(&self, id: &ContainerId) -> Result<ContainerInspect> {
        let info = self
            .backend
            .list()?
            .into_iter()
            .find(|info| info.id == *id)
            .ok_or_else(|| RetuneError::NotFound {
                kind: "container",
                id: id.to_string(),
            })?;
        let committed = self.resources.inspect_versioned(id)?;
        Ok(ContainerInspect {
            id: info.id,
            name: info.name,
            state: info.state,
            resources: committed.limits,
            version: committed.version,
        })
    }

    /// Executes a command inside a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running or the
    /// command fails to execute.
    pub fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        self.backend.exec(id, cmd)
    }

    /// Lists all containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot retrieve state.
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        self.backend.list()
    }

    /// The resource manager behind this engine.
    #[must_use]
    pub const fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Returns whether the backend is operational on this host.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }
}

#[cfg(test)]
mod tests {
    use retune_common::types::{ControlKey, Limit};
    use retune_core::cgroup::SimulatedCgroupFs;

    use super::*;
    use crate::backend::MemoryBackend;

    const MIB: i64 = 1024 * 1024;

    fn engine(defaults: ResourceLimits) -> (Engine, Arc<SimulatedCgroupFs>) {
        let cgroups = Arc::new(SimulatedCgroupFs::new());
        let backend = Arc::new(MemoryBackend::with_cgroups(Arc::clone(&cgroups)));
        let engine = Engine::with_parts(
            backend,
            Arc::clone(&cgroups) as Arc<dyn CgroupFs>,
            Arc::new(ConfigStore::in_memory()),
            UpdateSettings::default(),
            defaults,
        );
        (engine, cgroups)
    }

    fn config(resources: UpdateRequest) -> ContainerConfig {
        ContainerConfig {
            name: "web".into(),
            command: vec!["sleep".into(), "60".into()],
            env: Vec::new(),
            resources,
        }
    }

    #[tokio::test]
    async fn start_enforces_creation_limits() {
        let (engine, cgroups) = engine(ResourceLimits::default());
        let id = engine
            .create(&config(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)))
            .unwrap();
        assert!(cgroups.writes().is_empty());

        let _ = engine.start(&id).await.unwrap();
        assert_eq!(cgroups.read(&id, ControlKey::Memory).unwrap(), "209715200\n");
        assert_eq!(cgroups.read(&id, ControlKey::MemorySwap).unwrap(), "524288000\n");

        let inspect = engine.inspect(&id).unwrap();
        assert_eq!(inspect.state, ContainerState::Running);
        assert_eq!(inspect.resources.memory, Limit::Finite(209_715_200));
        assert_eq!(inspect.version, 1);
    }

    #[tokio::test]
    async fn defaults_apply_to_omitted_fields() {
        let defaults = ResourceLimits {
            cpu_quota: Limit::Finite(50_000),
            ..ResourceLimits::default()
        };
        let (engine, _) = engine(defaults);
        let id = engine.create(&config(UpdateRequest::new())).unwrap();
        assert_eq!(engine.inspect(&id).unwrap().resources.cpu_quota, Limit::Finite(50_000));
    }

    #[tokio::test]
    async fn invalid_creation_limits_create_nothing() {
        let (engine, _) = engine(ResourceLimits::default());
        let err = engine.create(&config(UpdateRequest::new().memory(MIB))).unwrap_err();
        assert!(matches!(err, RetuneError::InvalidResourceSpec { .. }));
        assert!(engine.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_requires_stop_and_forgets_limits() {
        let (engine, cgroups) = engine(ResourceLimits::default());
        let id = engine.create(&config(UpdateRequest::new())).unwrap();
        let _ = engine.start(&id).await.unwrap();
        assert!(engine.remove(&id).await.is_err());

        engine.stop(&id).unwrap();
        engine.remove(&id).await.unwrap();
        assert!(!cgroups.contains(&id));
        assert!(engine.resources().inspect(&id).is_err());
        assert!(matches!(engine.remove(&id).await, Err(RetuneError::NotFound { .. })));
    }
}
