//! Wire timestamps
//!
//! Timestamps on the wire are seconds + microseconds as observed by the
//! sender. They are compared only between the two ends of one exchange, so
//! plain wall-clock time is sufficient.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const USEC_PER_SEC: i64 = 1_000_000;

/// A seconds + microseconds wall-clock timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeVal {
    /// Seconds since the Unix epoch
    pub sec: i32,
    /// Microseconds within the second
    pub usec: i32,
}

impl TimeVal {
    /// Create a timestamp from raw parts
    pub fn new(sec: i32, usec: i32) -> Self {
        Self { sec, usec }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs() as i32,
            usec: elapsed.subsec_micros() as i32,
        }
    }

    /// Difference `self - earlier` in fractional seconds
    pub fn diff_secs(&self, earlier: TimeVal) -> f64 {
        (self.sec as f64 - earlier.sec as f64) + (self.usec as f64 - earlier.usec as f64) / 1e6
    }

    /// Difference `self - earlier` in fractional milliseconds
    pub fn diff_millis(&self, earlier: TimeVal) -> f64 {
        self.diff_secs(earlier) * 1e3
    }

    /// This timestamp advanced by a fractional number of milliseconds
    pub fn add_millis(&self, ms: f64) -> Self {
        let total = self.sec as i64 * USEC_PER_SEC + self.usec as i64 + (ms * 1e3).round() as i64;
        Self {
            sec: (total / USEC_PER_SEC) as i32,
            usec: (total % USEC_PER_SEC) as i32,
        }
    }
}
