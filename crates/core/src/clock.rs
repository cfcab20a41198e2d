// SPDX-License-Identifier: MIT

//! Clock abstraction so the executor's timestamps are deterministic in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time. Implementors must be cheap to clone (they are
/// threaded through every run driver).
pub trait Clock: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> u64;

    /// Current time as `SystemTime`, for annotation timestamps.
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + std::time::Duration::from_millis(self.epoch_ms())
    }
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Controllable clock for tests: starts at an arbitrary epoch and only moves
/// when told to.
#[derive(Debug, Clone)]
pub struct FakeClock {
    millis: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_epoch_ms: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_epoch_ms)),
        }
    }

    /// Advance the clock by `ms` milliseconds, returning the new value.
    pub fn advance(&self, ms: u64) -> u64 {
        self.millis.fetch_add(ms, Ordering::SeqCst) + ms
    }

    pub fn set(&self, epoch_ms: u64) {
        self.millis.store(epoch_ms, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for FakeClock {
    fn epoch_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
