//! End-to-end tests for live resource updates.
//!
//! Containers run on the in-memory backend, wired to the simulated cgroup
//! filesystem, which rejects writes the way the v1 kernel does. Every test
//! checks both what inspect reports and what the control files contain.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use retune_common::error::RetuneError;
use retune_common::types::{ContainerId, ControlKey, Limit, ResourceLimits, UpdateRequest};
use retune_core::cgroup::{CgroupFs, CgroupWriter, SimulatedCgroupFs};
use retune_runtime::backend::{ContainerConfig, ContainerHandle, MemoryBackend};
use retune_runtime::engine::Engine;
use retune_runtime::store::ConfigStore;
use retune_runtime::update::{ResourceManager, UpdateSettings};

const MIB: i64 = 1024 * 1024;

struct Harness {
    engine: Arc<Engine>,
    backend: Arc<MemoryBackend>,
    cgroups: Arc<SimulatedCgroupFs>,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(UpdateSettings::default())
    }

    fn with_settings(settings: UpdateSettings) -> Self {
        Self::with_store(ConfigStore::in_memory(), settings)
    }

    /// Records committed limits under `dir`, like the CLI does.
    fn persistent(dir: &std::path::Path) -> Self {
        Self::with_store(ConfigStore::open(dir).expect("open store"), UpdateSettings::default())
    }

    fn with_store(store: ConfigStore, settings: UpdateSettings) -> Self {
        let cgroups = Arc::new(SimulatedCgroupFs::new());
        let backend = Arc::new(MemoryBackend::with_cgroups(Arc::clone(&cgroups)));
        let engine = Engine::with_parts(
            Arc::clone(&backend) as Arc<dyn ContainerHandle>,
            Arc::clone(&cgroups) as Arc<dyn CgroupFs>,
            Arc::new(store),
            settings,
            ResourceLimits::default(),
        );
        Self {
            engine: Arc::new(engine),
            backend,
            cgroups,
        }
    }

    /// Creates and starts a container, then forgets the writes start made.
    async fn running(&self, resources: UpdateRequest) -> ContainerId {
        let config = ContainerConfig {
            name: "app".into(),
            command: vec!["sleep".into(), "infinity".into()],
            env: Vec::new(),
            resources,
        };
        let id = self.engine.create(&config).expect("create");
        let _ = self.engine.start(&id).await.expect("start");
        self.cgroups.clear_writes();
        id
    }

    fn kernel(&self, id: &ContainerId, key: ControlKey) -> String {
        self.cgroups.read(id, key).expect("read control file").trim().to_string()
    }

    fn kernel_limits(&self, id: &ContainerId) -> ResourceLimits {
        CgroupWriter::new(Arc::clone(&self.cgroups) as Arc<dyn CgroupFs>)
            .read_all(id)
            .expect("read kernel limits")
    }

    fn inspect(&self, id: &ContainerId) -> ResourceLimits {
        self.engine.inspect(id).expect("inspect").resources
    }

    fn written_keys(&self) -> Vec<ControlKey> {
        self.cgroups.writes().into_iter().map(|w| w.key).collect()
    }
}

fn mib(n: i64) -> Limit {
    Limit::Finite(u64::try_from(n * MIB).unwrap())
}

fn limits(memory: i64, swap: i64) -> ResourceLimits {
    ResourceLimits {
        memory: mib(memory),
        memory_swap: mib(swap),
        cpu_quota: Limit::Unlimited,
    }
}

// ── Read-after-write ─────────────────────────────────────────────────

#[tokio::test]
async fn memory_and_swap_update_from_unlimited() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new()).await;

    let committed = h
        .engine
        .update(&id, UpdateRequest::new().memory(314_572_800).memory_swap(524_288_000))
        .await
        .expect("update");

    assert_eq!(committed.memory, Limit::Finite(314_572_800));
    assert_eq!(committed.memory_swap, Limit::Finite(524_288_000));
    assert_eq!(h.inspect(&id), committed);
    assert_eq!(h.kernel(&id, ControlKey::Memory), "314572800");
    assert_eq!(h.kernel(&id, ControlKey::MemorySwap), "524288000");
    assert_eq!(h.written_keys(), vec![ControlKey::Memory, ControlKey::MemorySwap]);
}

#[tokio::test]
async fn cpu_quota_sequence_ends_unset() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new()).await;

    for quota in [15_000, 20_000, 10_000] {
        let committed = h.engine.update(&id, UpdateRequest::new().cpu_quota(quota)).await.expect("update");
        assert_eq!(committed.cpu_quota.as_api(), quota);
        assert_eq!(h.inspect(&id).cpu_quota.as_api(), quota);
        assert_eq!(h.kernel(&id, ControlKey::CpuQuota), quota.to_string());
    }

    let committed = h.engine.update(&id, UpdateRequest::new().cpu_quota(-1)).await.expect("clear");
    assert_eq!(committed.cpu_quota, Limit::Unlimited);
    assert_eq!(h.inspect(&id).cpu_quota, Limit::Unlimited);
    assert_eq!(h.kernel(&id, ControlKey::CpuQuota), "-1");
    assert_eq!(h.engine.inspect(&id).unwrap().version, 5);
}

#[tokio::test]
async fn clearing_memory_reads_back_kernel_maximum() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;

    let committed = h.engine.update(&id, UpdateRequest::new().memory(-1)).await.expect("update");
    assert_eq!(committed.memory, Limit::Unlimited);
    assert_eq!(committed.memory_swap, Limit::Unlimited);
    assert_eq!(h.kernel(&id, ControlKey::Memory), "9223372036854771712");
    assert_eq!(h.kernel_limits(&id), committed);
}

// ── Ordering safety ──────────────────────────────────────────────────

#[tokio::test]
async fn raising_memory_within_swap_is_a_single_write() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;

    let committed = h.engine.update(&id, UpdateRequest::new().memory(300 * MIB)).await.expect("update");
    assert_eq!(committed, limits(300, 500));
    assert_eq!(h.written_keys(), vec![ControlKey::Memory]);
    assert_eq!(h.kernel_limits(&id), committed);
}

#[tokio::test]
async fn raising_memory_past_swap_raises_swap_first() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;

    let committed = h.engine.update(&id, UpdateRequest::new().memory(600 * MIB)).await.expect("update");
    assert_eq!(committed, limits(600, 600));
    assert_eq!(h.written_keys(), vec![ControlKey::MemorySwap, ControlKey::Memory]);
    assert_eq!(h.kernel_limits(&id), committed);
}

#[tokio::test]
async fn lowering_both_writes_memory_first() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(600 * MIB).memory_swap(800 * MIB)).await;

    let committed = h
        .engine
        .update(&id, UpdateRequest::new().memory(100 * MIB).memory_swap(150 * MIB))
        .await
        .expect("update");
    assert_eq!(committed, limits(100, 150));
    assert_eq!(h.written_keys(), vec![ControlKey::Memory, ControlKey::MemorySwap]);
}

#[tokio::test]
async fn explicit_swap_below_memory_writes_nothing() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;

    let err = h
        .engine
        .update(&id, UpdateRequest::new().memory(600 * MIB).memory_swap(500 * MIB))
        .await
        .expect_err("rejected");
    assert!(matches!(err, RetuneError::InvalidResourceSpec { .. }));
    assert!(h.cgroups.writes().is_empty());
    assert_eq!(h.inspect(&id), limits(200, 500));
}

#[tokio::test]
async fn memory_at_kernel_maximum_writes_nothing() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB)).await;

    let err = h.engine.update(&id, UpdateRequest::new().memory(i64::MAX)).await.expect_err("unrepresentable");
    assert!(matches!(err, RetuneError::InvalidResourceSpec { .. }));
    assert!(h.cgroups.writes().is_empty());
    assert_eq!(h.inspect(&id).memory, mib(200));
    assert_eq!(h.kernel_limits(&id).memory, mib(200));
}

// ── Idempotence ──────────────────────────────────────────────────────

#[tokio::test]
async fn repeating_an_update_changes_nothing() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new()).await;
    let request = UpdateRequest::new().memory(300 * MIB).memory_swap(500 * MIB).cpu_quota(20_000);

    let first = h.engine.update(&id, request).await.expect("first");
    let version = h.engine.inspect(&id).unwrap().version;
    h.cgroups.clear_writes();

    let second = h.engine.update(&id, request).await.expect("second");
    assert_eq!(first, second);
    assert!(h.cgroups.writes().is_empty());
    assert_eq!(h.engine.inspect(&id).unwrap().version, version);
}

// ── Failure and rollback ─────────────────────────────────────────────

#[tokio::test]
async fn kernel_rejection_rolls_back_earlier_writes() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;
    h.cgroups.fail_next_write(ControlKey::Memory, libc::EINVAL);

    let err = h.engine.update(&id, UpdateRequest::new().memory(600 * MIB)).await.expect_err("rejected");
    match err {
        RetuneError::KernelRejected { key, value, .. } => {
            assert_eq!(key, ControlKey::Memory);
            assert_eq!(value, mib(600));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.inspect(&id), limits(200, 500));
    assert_eq!(h.kernel_limits(&id), limits(200, 500));
    assert_eq!(h.engine.inspect(&id).unwrap().version, 1);
}

#[tokio::test]
async fn io_failure_on_quota_restores_memory() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;
    h.cgroups.fail_next_write(ControlKey::CpuQuota, libc::EIO);

    let request = UpdateRequest::new().memory(300 * MIB).cpu_quota(20_000);
    let err = h.engine.update(&id, request).await.expect_err("io failure");
    assert!(matches!(err, RetuneError::IoFailure { key: ControlKey::CpuQuota, .. }));
    assert!(err.is_transient());
    assert_eq!(h.kernel_limits(&id), limits(200, 500));

    let committed = h.engine.update(&id, request).await.expect("retry succeeds");
    assert_eq!(committed.cpu_quota, Limit::Finite(20_000));
    assert_eq!(h.kernel_limits(&id), committed);
}

#[tokio::test]
async fn failed_rollback_is_reported_as_inconsistent() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;
    h.cgroups.fail_after(ControlKey::Memory, 1, libc::EIO);
    h.cgroups.fail_next_write(ControlKey::CpuQuota, libc::EIO);

    let err = h
        .engine
        .update(&id, UpdateRequest::new().memory(300 * MIB).cpu_quota(20_000))
        .await
        .expect_err("rollback fails");
    assert!(matches!(err, RetuneError::InconsistentState { .. }));
    assert_eq!(h.inspect(&id), limits(200, 500));
    assert_eq!(h.kernel(&id, ControlKey::Memory), (300 * MIB).to_string());
}

#[tokio::test]
async fn timed_out_write_is_rolled_back_after_it_lands() {
    let h = Harness::with_settings(UpdateSettings {
        write_timeout: Duration::from_millis(20),
        commit_retries: 3,
    });
    let id = h.running(UpdateRequest::new()).await;
    h.cgroups.delay_writes(ControlKey::CpuQuota, Duration::from_millis(150));

    let err = h.engine.update(&id, UpdateRequest::new().cpu_quota(15_000)).await.expect_err("timeout");
    assert!(matches!(err, RetuneError::IoFailure { .. }));
    assert_eq!(h.inspect(&id).cpu_quota, Limit::Unlimited);
    assert_eq!(h.kernel(&id, ControlKey::CpuQuota), "-1");
}

#[tokio::test]
async fn failed_commit_after_writes_restores_the_kernel() {
    let dir = tempfile::tempdir().unwrap();
    let records = dir.path().join("limits");
    let h = Harness::persistent(&records);
    let id = h.running(UpdateRequest::new()).await;
    std::fs::remove_dir_all(&records).unwrap();
    std::fs::write(&records, b"not a directory").unwrap();

    let err = h.engine.update(&id, UpdateRequest::new().cpu_quota(20_000)).await.expect_err("store unwritable");
    assert!(matches!(err, RetuneError::Io { .. }));
    assert_eq!(h.written_keys(), vec![ControlKey::CpuQuota, ControlKey::CpuQuota]);
    assert_eq!(h.kernel(&id, ControlKey::CpuQuota), "-1");
    assert_eq!(h.inspect(&id), ResourceLimits::default());
    assert_eq!(h.engine.inspect(&id).unwrap().version, 1);
}

// ── Lifecycle races ──────────────────────────────────────────────────

#[tokio::test]
async fn removal_during_update_is_container_not_running() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;
    h.cgroups.delay_writes(ControlKey::MemorySwap, Duration::from_millis(200));

    let engine = Arc::clone(&h.engine);
    let task_id = id.clone();
    let update = tokio::spawn(async move { engine.update(&task_id, UpdateRequest::new().memory(600 * MIB)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.backend.stop(&id).unwrap();
    h.backend.remove(&id).unwrap();

    let err = update.await.unwrap().expect_err("container vanished");
    assert!(matches!(err, RetuneError::ContainerNotRunning { .. }));
    assert_eq!(h.engine.resources().inspect(&id).unwrap(), limits(200, 500));
}

#[tokio::test]
async fn stop_during_update_restores_previous_limits() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new()).await;
    h.cgroups.delay_writes(ControlKey::CpuQuota, Duration::from_millis(150));

    let engine = Arc::clone(&h.engine);
    let task_id = id.clone();
    let update = tokio::spawn(async move { engine.update(&task_id, UpdateRequest::new().cpu_quota(20_000)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.backend.stop(&id).unwrap();

    let err = update.await.unwrap().expect_err("stopped mid-update");
    assert!(matches!(err, RetuneError::ContainerNotRunning { .. }));
    assert_eq!(h.inspect(&id).cpu_quota, Limit::Unlimited);
    assert_eq!(h.kernel(&id, ControlKey::CpuQuota), "-1");
}

#[tokio::test]
async fn removed_container_cannot_be_updated() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new()).await;
    h.engine.stop(&id).unwrap();
    h.engine.remove(&id).await.unwrap();

    let err = h.engine.update(&id, UpdateRequest::new().cpu_quota(20_000)).await.expect_err("gone");
    assert!(matches!(err, RetuneError::ContainerNotRunning { .. }));
    assert!(h.cgroups.writes().is_empty());
    assert_eq!(h.engine.resources().live_locks(), 0);
}

// ── Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn abandoned_update_still_completes() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;
    h.cgroups.delay_writes(ControlKey::MemorySwap, Duration::from_millis(150));

    let waited = tokio::time::timeout(
        Duration::from_millis(20),
        h.engine.update(&id, UpdateRequest::new().memory(600 * MIB)),
    )
    .await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.inspect(&id), limits(600, 600));
    assert_eq!(h.kernel_limits(&id), limits(600, 600));
}

// ── Concurrency ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_to_one_container_serialize() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new()).await;

    let tasks: Vec<_> = (1..=8)
        .map(|i| {
            let engine = Arc::clone(&h.engine);
            let id = id.clone();
            tokio::spawn(async move { engine.update(&id, UpdateRequest::new().cpu_quota(10_000 * i)).await })
        })
        .collect();
    for task in tasks {
        let _ = task.await.unwrap().expect("every update commits");
    }

    let inspect = h.engine.inspect(&id).unwrap();
    assert_eq!(inspect.version, 9);
    assert_eq!(h.kernel_limits(&id), inspect.resources);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inspect_never_sees_a_partial_update() {
    let h = Harness::new();
    let id = h.running(UpdateRequest::new().memory(200 * MIB).memory_swap(500 * MIB)).await;
    for key in ControlKey::ALL {
        h.cgroups.delay_writes(key, Duration::from_millis(40));
    }
    let before = limits(200, 500);
    let after = ResourceLimits {
        cpu_quota: Limit::Finite(20_000),
        ..limits(600, 800)
    };

    let engine = Arc::clone(&h.engine);
    let task_id = id.clone();
    let update = tokio::spawn(async move {
        engine
            .update(&task_id, UpdateRequest::new().memory(600 * MIB).memory_swap(800 * MIB).cpu_quota(20_000))
            .await
    });
    while !update.is_finished() {
        let seen = h.inspect(&id);
        assert!(seen == before || seen == after, "partial state observed: {seen:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(update.await.unwrap().unwrap(), after);
    assert_eq!(h.kernel_limits(&id), after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_containers_update_in_parallel() {
    let h = Harness::new();
    let slow = h.running(UpdateRequest::new()).await;
    let fast = h.running(UpdateRequest::new()).await;
    h.cgroups.delay_writes(ControlKey::MemorySwap, Duration::from_millis(300));

    let engine = Arc::clone(&h.engine);
    let slow_id = slow.clone();
    let slow_update = tokio::spawn(async move {
        engine
            .update(&slow_id, UpdateRequest::new().memory(300 * MIB).memory_swap(500 * MIB))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fast_update = tokio::time::timeout(
        Duration::from_millis(200),
        h.engine.update(&fast, UpdateRequest::new().cpu_quota(20_000)),
    )
    .await
    .expect("not blocked by the other container");
    assert!(fast_update.is_ok());
    let _ = slow_update.await.unwrap().expect("slow update");
}

// ── Conflicts with another process ───────────────────────────────────

fn shared_managers(
    dir: &std::path::Path,
    retries: u32,
) -> (ResourceManager, ResourceManager, Arc<MemoryBackend>, Arc<SimulatedCgroupFs>, ContainerId) {
    let cgroups = Arc::new(SimulatedCgroupFs::new());
    let backend = Arc::new(MemoryBackend::with_cgroups(Arc::clone(&cgroups)));
    let settings = UpdateSettings {
        commit_retries: retries,
        ..UpdateSettings::default()
    };
    let manager = |store: ConfigStore| {
        ResourceManager::new(
            Arc::clone(&backend) as Arc<dyn ContainerHandle>,
            CgroupWriter::new(Arc::clone(&cgroups) as Arc<dyn CgroupFs>),
            Arc::new(store),
            settings,
        )
    };

    let id = backend.create(&ContainerConfig::default()).unwrap();
    let _ = backend.start(&id).unwrap();
    let first = manager(ConfigStore::open(dir).unwrap());
    let _ = first.register(&id, ResourceLimits::default()).unwrap();
    let second = manager(ConfigStore::open(dir).unwrap());
    (first, second, backend, cgroups, id)
}

#[tokio::test]
async fn stale_writer_raises_memory_past_the_winners_swap() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second, _backend, cgroups, id) = shared_managers(dir.path(), 0);

    let _ = first
        .update(&id, UpdateRequest::new().memory(300 * MIB).memory_swap(500 * MIB))
        .await
        .unwrap();
    let raised = second.update(&id, UpdateRequest::new().memory(600 * MIB)).await.unwrap();

    assert_eq!(raised, limits(600, 600));
    assert_eq!(second.inspect_versioned(&id).unwrap().version, 3);
    assert_eq!(first.inspect(&id).unwrap(), limits(600, 600));
    let kernel = CgroupWriter::new(cgroups as Arc<dyn CgroupFs>).read_all(&id).unwrap();
    assert_eq!(kernel, limits(600, 600));
}

/// Starts a quota update on `second` that stalls in the kernel, and lets
/// `first` commit a memory change while it does.
async fn race_quota_against_memory(
    first: &ResourceManager,
    second: &ResourceManager,
    cgroups: &SimulatedCgroupFs,
    id: &ContainerId,
) -> Result<ResourceLimits, RetuneError> {
    cgroups.delay_writes(ControlKey::CpuQuota, Duration::from_millis(200));
    let stalled = second.clone();
    let task_id = id.clone();
    let quota = tokio::spawn(async move { stalled.update(&task_id, UpdateRequest::new().cpu_quota(20_000)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _ = first
        .update(id, UpdateRequest::new().memory(300 * MIB).memory_swap(500 * MIB))
        .await
        .unwrap();
    quota.await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_writer_revalidates_against_the_winner() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second, _backend, cgroups, id) = shared_managers(dir.path(), 3);

    let merged = race_quota_against_memory(&first, &second, &cgroups, &id).await.unwrap();

    let expected = ResourceLimits {
        cpu_quota: Limit::Finite(20_000),
        ..limits(300, 500)
    };
    assert_eq!(merged, expected);
    assert_eq!(second.inspect_versioned(&id).unwrap().version, 3);
    let kernel = CgroupWriter::new(cgroups as Arc<dyn CgroupFs>).read_all(&id).unwrap();
    assert_eq!(kernel, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn conflict_without_retries_restores_committed_limits() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second, _backend, cgroups, id) = shared_managers(dir.path(), 0);

    let err = race_quota_against_memory(&first, &second, &cgroups, &id).await.unwrap_err();
    assert!(matches!(err, RetuneError::ConcurrentModification { expected: 1, found: 2, .. }));

    let kernel = CgroupWriter::new(cgroups as Arc<dyn CgroupFs>).read_all(&id).unwrap();
    assert_eq!(kernel, limits(300, 500));
    assert_eq!(second.inspect(&id).unwrap(), limits(300, 500));
}
