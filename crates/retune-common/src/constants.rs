//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Retune data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/retune";

/// Returns the data directory, preferring `$HOME/.retune` when it can be
/// created, falling back to `/var/lib/retune`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".retune");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Cgroup filesystem mount point. Controllers of the legacy (v1)
/// hierarchy live in per-controller subdirectories below it.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Parent group under each controller where container cgroups are created.
pub const DEFAULT_CGROUP_PARENT: &str = "retune";

/// Name of the lifecycle index inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Directory (inside the data directory) holding committed resource records.
pub const LIMITS_DIR_NAME: &str = "limits";

/// Smallest memory ceiling accepted for a container (6 MiB).
pub const MIN_MEMORY_BYTES: u64 = 6 * 1024 * 1024;

/// Smallest CFS quota the kernel accepts, in microseconds.
pub const MIN_CPU_QUOTA_US: u64 = 1000;

/// Value the v1 memory controller reports for an unlimited ceiling
/// (`PAGE_COUNTER_MAX` rounded to 4 KiB pages).
pub const V1_MEMORY_UNLIMITED: u64 = 9_223_372_036_854_771_712;

/// Default timeout for a single cgroup write, in milliseconds.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Default number of re-validation attempts after a commit conflict.
pub const DEFAULT_COMMIT_RETRIES: u32 = 3;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "retune";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "retune";
