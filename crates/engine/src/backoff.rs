// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with proportional jitter.

use rand::Rng;
use std::time::Duration;

/// Retry delay policy: `min(base * 2^attempt, cap)` with ±`jitter` spread
/// so a herd of failing upstreams does not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Proportional jitter, 0.0..=1.0. 0.2 means ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based: the first retry gets
    /// roughly `base`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter > 0.0 {
            rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic core, split out for tests.
    pub(crate) fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;
        let exp = base_ms * 2f64.powi(attempt.min(32) as i32);
        let bounded = exp.min(cap_ms);
        let with_jitter = (bounded * (1.0 + jitter)).max(0.0);
        Duration::from_millis(with_jitter as u64)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
