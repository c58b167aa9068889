// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart-loop tripwire.
//!
//! A separate guard from consecutive-failure counting: an upstream that
//! reaches Ready briefly and then dies keeps resetting its failure counter,
//! so rapid transport churn is tracked on its own ring of restart
//! timestamps and promotes straight to auto-disable.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// Bounded ring of recent transport (re)creations for one upstream.
#[derive(Debug)]
pub struct RestartTracker {
    max_restarts: u32,
    window: Duration,
    cooldown: Duration,
    restarts: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl RestartTracker {
    pub fn new(max_restarts: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            max_restarts,
            window,
            cooldown,
            restarts: VecDeque::new(),
            blocked_until: None,
        }
    }

    /// Record one transport creation at `now`.
    ///
    /// Returns true when this restart exceeds `max_restarts` within the
    /// window: the caller must promote to auto-disable with reason
    /// `restart-loop` and no further connects happen for the cooldown.
    pub fn record_restart(&mut self, now: Instant) -> bool {
        while let Some(front) = self.restarts.front() {
            if now.duration_since(*front) > self.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        self.restarts.push_back(now);
        if self.restarts.len() as u32 > self.max_restarts {
            self.blocked_until = Some(now + self.cooldown);
            self.restarts.clear();
            true
        } else {
            false
        }
    }

    /// Remaining cooldown, if restarts are currently blocked.
    pub fn blocked_remaining(&self, now: Instant) -> Option<Duration> {
        match self.blocked_until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_remaining(now).is_some()
    }

    /// Drop the most recent restart. Authentication failures surface to
    /// the user instead of accumulating, so their transport creations are
    /// forgiven after the fact.
    pub fn forgive(&mut self) {
        self.restarts.pop_back();
    }

    /// Forget history and cooldown, used when the user clears auto-disable.
    pub fn reset(&mut self) {
        self.restarts.clear();
        self.blocked_until = None;
    }
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RESTARTS,
            DEFAULT_RESTART_WINDOW,
            DEFAULT_RESTART_COOLDOWN,
        )
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
