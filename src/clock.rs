//! Wall-clock stamps used in trace lines

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Duration as fractional milliseconds
pub fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
