// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time sources.
//!
//! Everything that measures windows, cooldowns, or stamps events goes
//! through a [`Clock`] so tests can drive time by hand instead of
//! sleeping.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A time source. Implementations are cheap to clone and all clones
/// observe the same timeline.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Monotonic instant, used for windows and cooldowns.
    fn now(&self) -> Instant;
    /// Wall-clock milliseconds since the Unix epoch, used for event
    /// timestamps and persisted records.
    fn epoch_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        // A host clock set before 1970 reads as zero rather than failing.
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as u64,
            Err(_) => 0,
        }
    }
}

/// Monotonic and wall time advance together under one lock.
struct FakeTime {
    instant: Instant,
    epoch_ms: u64,
}

/// Hand-driven clock for tests. Time only moves when told to.
#[derive(Clone)]
pub struct FakeClock {
    time: Arc<Mutex<FakeTime>>,
}

impl FakeClock {
    /// Starts at an arbitrary fixed wall time (epoch ms 1,000,000).
    pub fn new() -> Self {
        Self::at_epoch_ms(1_000_000)
    }

    /// Starts at the given wall time.
    pub fn at_epoch_ms(epoch_ms: u64) -> Self {
        Self {
            time: Arc::new(Mutex::new(FakeTime {
                instant: Instant::now(),
                epoch_ms,
            })),
        }
    }

    /// Move both the monotonic and wall clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock();
        time.instant += by;
        time.epoch_ms += by.as_millis() as u64;
    }

    /// Jump the wall clock without touching the monotonic one.
    pub fn set_epoch_ms(&self, epoch_ms: u64) {
        self.time.lock().epoch_ms = epoch_ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.time.lock().instant
    }

    fn epoch_ms(&self) -> u64 {
        self.time.lock().epoch_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
