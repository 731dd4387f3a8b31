//! Time control for deterministic tests

use keystone_core::{PhysicalClock, Result, TimestampMs, TrustError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Start time used by fixtures: 2024-01-01T00:00:00Z
pub const TEST_EPOCH_MS: TimestampMs = 1_704_067_200_000;

/// Clock that only moves when told to; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl ManualClock {
    /// Clock frozen at `start`
    pub fn new(start: TimestampMs) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clock frozen at [`TEST_EPOCH_MS`]
    pub fn at_test_epoch() -> Self {
        Self::new(TEST_EPOCH_MS)
    }

    /// Jump to an absolute time
    pub fn set(&self, now: TimestampMs) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Current reading, ignoring failure injection
    pub fn current(&self) -> TimestampMs {
        self.now.load(Ordering::SeqCst)
    }

    /// Make subsequent reads fail with `ClockUnavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_test_epoch()
    }
}

impl PhysicalClock for ManualClock {
    fn now_ms(&self) -> Result<TimestampMs> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TrustError::clock_unavailable("injected clock failure"));
        }
        Ok(self.now.load(Ordering::SeqCst))
    }
}
