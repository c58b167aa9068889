// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Aggregate application state, derived from the per-upstream states.
//!
//! Starting latches to Running once every upstream sits in a stable
//! state. Running never regresses to Starting, however much individual
//! upstreams churn afterwards; the only ways out are Stopping and then
//! Stopped during shutdown.

use mcpproxy_core::{AppState, Clock, Event, EventBus, RuntimeState};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub struct AppStateTracker<C: Clock> {
    bus: EventBus,
    clock: C,
    state: Mutex<AppState>,
}

impl<C: Clock> AppStateTracker<C> {
    pub fn new(bus: EventBus, clock: C) -> Arc<Self> {
        Arc::new(Self {
            bus,
            clock,
            state: Mutex::new(AppState::Starting),
        })
    }

    pub fn current(&self) -> AppState {
        *self.state.lock()
    }

    /// Re-evaluate against a snapshot of every upstream's state.
    pub fn observe(&self, states: &[RuntimeState]) {
        // An empty upstream set is trivially settled.
        let all_stable = states.iter().all(|s| s.is_stable());
        if all_stable {
            self.advance(AppState::Starting, AppState::Running);
        }
    }

    pub fn begin_stopping(&self) {
        if !self.advance(AppState::Running, AppState::Stopping) {
            self.advance(AppState::Starting, AppState::Stopping);
        }
    }

    pub fn finish_stopped(&self) {
        self.advance(AppState::Stopping, AppState::Stopped);
    }

    /// Compare-and-set with exactly one event per accepted change.
    fn advance(&self, from: AppState, to: AppState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != from {
                return false;
            }
            *state = to;
        }
        info!(from = %from, to = %to, "application state changed");
        self.bus.publish(Event::AppStateChanged {
            old_state: from.as_str().to_string(),
            new_state: to.as_str().to_string(),
            ts_ms: self.clock.epoch_ms(),
        });
        true
    }
}

#[cfg(test)]
#[path = "app_state_tests.rs"]
mod tests;
