//! Wall clock helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Current time in `tz`.
#[must_use]
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
