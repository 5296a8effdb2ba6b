use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, clamped to 0 for instants before it.
pub fn to_epoch_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

pub fn from_epoch_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
