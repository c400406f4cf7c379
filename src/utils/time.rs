/// Time utilities for bucket alignment and display
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{CacheError, Result};

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn ms_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CacheError::InvalidParameter(format!("timestamp out of range: {}", ms)))
}

/// Floor `ts_ms` to the start of its `step_ms` bucket, anchored at the Unix epoch
pub fn align_down(ts_ms: i64, step_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(step_ms)
}

/// Render an epoch-ms timestamp in `tz` as RFC 3339
pub fn format_in_tz(ms: i64, tz: &Tz) -> Result<String> {
    Ok(ms_to_utc(ms)?.with_timezone(tz).to_rfc3339())
}
