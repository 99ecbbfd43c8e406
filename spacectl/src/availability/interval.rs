//! Half-open time intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// `[a, b)` and `[c, d)` overlap iff `a < d && c < b`.
///
/// Back-to-back intervals (`b == c`) do not overlap.
pub fn overlaps<T: PartialOrd>(a: T, b: T, c: T, d: T) -> bool {
    a < d && c < b
}

/// A validated `[start, end)` interval with `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidInterval {
                message: format!("interval end {end} must be after start {start}"),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}
