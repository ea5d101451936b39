//! CPU controller value encoding.
//!
//! Covers `cpu.cfs_quota_us`, the CFS bandwidth quota in microseconds per
//! `cpu.cfs_period_us`. The kernel both accepts and reports `-1` for "no
//! quota".

use retune_common::types::Limit;

/// Text written to `cpu.cfs_quota_us` for the given quota.
#[must_use]
pub fn encode(limit: Limit) -> String {
    match limit {
        Limit::Finite(micros) => micros.to_string(),
        Limit::Unlimited => "-1".to_string(),
    }
}

/// Parses the text read from `cpu.cfs_quota_us`.
///
/// The unified-hierarchy `cpu.max` form (`"max 100000"` or
/// `"20000 100000"`) is accepted as well; only the quota is returned.
#[must_use]
pub fn decode(text: &str) -> Option<Limit> {
    let quota = text.split_whitespace().next()?;
    if quota == "-1" || quota == "max" {
        return Some(Limit::Unlimited);
    }
    quota.parse::<u64>().ok().map(Limit::Finite)
}
