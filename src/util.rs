use std::time::Duration;

use crate::instant::Instant;

/// Time remaining until data written at `updated_at` becomes stale.
/// Zero means the data is already stale.
pub(crate) fn time_until_stale(updated_at: Instant, stale_time: Duration) -> Duration {
    match updated_at.0.checked_add(stale_time) {
        Some(deadline) => deadline.duration_since(tokio::time::Instant::now()),
        // Overflow means the deadline is unreachable.
        None => Duration::MAX,
    }
}

/// Milliseconds since the Unix epoch, for trace entries.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
