//! Cross-cutting helpers: logging macros, wall-clock time, test builders.

pub mod log;
#[cfg(test)]
pub mod test_utils;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
