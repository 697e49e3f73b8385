use std::time::Duration;

use chrono::{DateTime, Utc};

pub fn epoch_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Absolute time of an offset from `start`, saturating on overflow.
pub fn offset_from(start: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(offset)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(start)
}
