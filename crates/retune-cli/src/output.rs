//! Formatted output helpers for CLI commands.
//!
//! Human-readable sizes for tables, and the size parser used by the
//! `--memory` style flags.

use std::fmt::Write as _;

use retune_common::types::{Limit, ResourceLimits};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Formats a byte count into a human-readable string (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a byte limit, or "unlimited".
#[must_use]
pub fn format_limit_bytes(limit: Limit) -> String {
    limit.finite().map_or_else(|| "unlimited".to_string(), format_bytes)
}

/// Formats a CPU quota in microseconds, or "unlimited".
#[must_use]
pub fn format_limit_micros(limit: Limit) -> String {
    limit
        .finite()
        .map_or_else(|| "unlimited".to_string(), |us| format!("{us}us"))
}

/// Renders committed limits as aligned key/value lines.
#[must_use]
pub fn limits_table(limits: &ResourceLimits) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<12} {}", "MEMORY", format_limit_bytes(limits.memory));
    let _ = writeln!(out, "{:<12} {}", "MEMORY+SWAP", format_limit_bytes(limits.memory_swap));
    let _ = writeln!(out, "{:<12} {}", "CPU QUOTA", format_limit_micros(limits.cpu_quota));
    out
}

/// Parses a size flag such as `300MiB`, `1GB`, `524288000`, or `-1`.
///
/// Negative plain values pass through untouched so the API sentinels
/// (`-1`, `0`) reach validation unchanged.
///
/// # Errors
///
/// Returns a message suitable for clap if the value is not a size.
pub fn parse_bytes(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if let Ok(plain) = s.parse::<i64>() {
        return Ok(plain);
    }
    let (num, multiplier): (&str, u64) = if let Some(n) = s.strip_suffix("GiB") {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix("MiB") {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix("KiB") {
        (n, KIB)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1000)
    } else {
        return Err(format!("invalid size {s:?}"));
    };
    num.trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .and_then(|bytes| i64::try_from(bytes).ok())
        .ok_or_else(|| format!("invalid size {s:?}"))
}
