//! Physical clock abstraction
//!
//! Expiry decisions read time through [`PhysicalClock`] so that tests can
//! drive it deterministically. Timestamps are milliseconds since the Unix
//! epoch. A clock read failure is an error, and callers on the enforcement
//! path treat it as denial.

use crate::errors::{Result, TrustError};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub type TimestampMs = u64;

/// Wall-clock time source
pub trait PhysicalClock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> Result<TimestampMs>;
}

/// Clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now_ms(&self) -> Result<TimestampMs> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TrustError::clock_unavailable(e.to_string()))?;
        u64::try_from(elapsed.as_millis())
            .map_err(|_| TrustError::clock_unavailable("timestamp overflow"))
    }
}

/// Add a duration to a timestamp, saturating at `u64::MAX`
pub fn add_duration(ts: TimestampMs, duration: Duration) -> TimestampMs {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    ts.saturating_add(millis)
}
