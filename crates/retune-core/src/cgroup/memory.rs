//! Memory controller value encoding.
//!
//! Covers `memory.limit_in_bytes` and `memory.memsw.limit_in_bytes`. Both
//! accept `-1` to remove the ceiling and report an unlimited ceiling as the
//! page-counter maximum rather than echoing `-1` back.

use retune_common::constants::V1_MEMORY_UNLIMITED;
use retune_common::types::Limit;

/// Text written to a memory control file for the given ceiling.
#[must_use]
pub fn encode(limit: Limit) -> String {
    match limit {
        Limit::Finite(bytes) => bytes.to_string(),
        Limit::Unlimited => "-1".to_string(),
    }
}

/// Parses the text read from a memory control file.
///
/// Returns `None` if the content is not a byte count.
#[must_use]
pub fn decode(text: &str) -> Option<Limit> {
    let text = text.trim();
    if text == "-1" || text == "max" {
        return Some(Limit::Unlimited);
    }
    let bytes = text.parse::<u64>().ok()?;
    if bytes >= V1_MEMORY_UNLIMITED {
        Some(Limit::Unlimited)
    } else {
        Some(Limit::Finite(bytes))
    }
}
