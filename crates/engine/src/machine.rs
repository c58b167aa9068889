// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-upstream state machine.
//!
//! Transitions are serialized by a per-upstream mutex; concurrent callers
//! observe a strictly ordered sequence, and every accepted transition
//! publishes exactly one `server_state_changed` event. A watch channel
//! mirrors the state for in-process waiters (on-demand connects, serve
//! loops) without them having to subscribe to the bus.

use crate::EngineError;
use mcpproxy_core::{Clock, Event, EventBus, RuntimeState, ServerName};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

/// Observability snapshot of one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineStatus {
    pub state: RuntimeState,
    pub consecutive_failures: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub first_attempt_ms: Option<u64>,
    pub last_retry_ms: Option<u64>,
    pub connected_at_ms: Option<u64>,
    pub last_success_ms: Option<u64>,
}

#[derive(Debug)]
struct MachineInner {
    state: RuntimeState,
    consecutive_failures: u32,
    retry_count: u32,
    last_error: Option<String>,
    first_attempt_ms: Option<u64>,
    last_retry_ms: Option<u64>,
    connected_at_ms: Option<u64>,
    last_success_ms: Option<u64>,
}

pub struct StateMachine<C: Clock> {
    server: ServerName,
    bus: EventBus,
    clock: C,
    inner: Mutex<MachineInner>,
    state_tx: watch::Sender<RuntimeState>,
}

impl<C: Clock> StateMachine<C> {
    /// `initial_failures` comes from the persisted upstream record so a
    /// restart does not reset auto-disable progress.
    pub fn new(server: ServerName, bus: EventBus, clock: C, initial_failures: u32) -> Self {
        let (state_tx, _) = watch::channel(RuntimeState::NotStarted);
        Self {
            server,
            bus,
            clock,
            inner: Mutex::new(MachineInner {
                state: RuntimeState::NotStarted,
                consecutive_failures: initial_failures,
                retry_count: 0,
                last_error: None,
                first_attempt_ms: None,
                last_retry_ms: None,
                connected_at_ms: None,
                last_success_ms: None,
            }),
            state_tx,
        }
    }

    pub fn server(&self) -> &ServerName {
        &self.server
    }

    pub fn state(&self) -> RuntimeState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Watch receiver mirroring every state change.
    pub fn watch(&self) -> watch::Receiver<RuntimeState> {
        self.state_tx.subscribe()
    }

    /// Attempt a transition, enforcing the permitted-transition table.
    /// Returns the previous state.
    pub fn transition(&self, to: RuntimeState) -> Result<RuntimeState, EngineError> {
        self.transition_inner(to, None, true)
    }

    /// Transition to `Error` with a reason. `counts` is false for
    /// authentication failures, which never accumulate toward auto-disable.
    pub fn fail(&self, error: impl Into<String>, counts: bool) -> Result<RuntimeState, EngineError> {
        self.transition_inner(RuntimeState::Error, Some(error.into()), counts)
    }

    fn transition_inner(
        &self,
        to: RuntimeState,
        error: Option<String>,
        counts: bool,
    ) -> Result<RuntimeState, EngineError> {
        let ts_ms = self.clock.epoch_ms();
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            if !from.can_transition(to) {
                return Err(EngineError::InvalidTransition {
                    server: self.server.clone(),
                    from,
                    to,
                });
            }

            match to {
                RuntimeState::Error => {
                    if counts && (from == RuntimeState::Ready || from.is_transient()) {
                        inner.consecutive_failures += 1;
                    }
                    inner.last_error = error;
                    inner.connected_at_ms = None;
                }
                RuntimeState::Ready => {
                    inner.consecutive_failures = 0;
                    inner.last_success_ms = Some(ts_ms);
                    inner.connected_at_ms = Some(ts_ms);
                    inner.last_error = None;
                }
                RuntimeState::Connecting => {
                    if inner.first_attempt_ms.is_none() {
                        inner.first_attempt_ms = Some(ts_ms);
                    }
                    if from == RuntimeState::Error {
                        inner.retry_count += 1;
                        inner.last_retry_ms = Some(ts_ms);
                    }
                }
                _ => {
                    if to.forbids_transport() {
                        inner.connected_at_ms = None;
                    }
                }
            }

            inner.state = to;
            from
        };

        let _ = self.state_tx.send(to);
        self.bus.publish(Event::ServerStateChanged {
            server: self.server.clone(),
            old_state: from.as_str().to_string(),
            new_state: to.as_str().to_string(),
            ts_ms,
            data: Value::Null,
        });
        Ok(from)
    }

    /// Zero the failure counter (auto-disable clearance).
    pub fn reset_failures(&self) {
        self.inner.lock().consecutive_failures = 0;
    }

    pub fn status(&self) -> MachineStatus {
        let inner = self.inner.lock();
        MachineStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_count: inner.retry_count,
            last_error: inner.last_error.clone(),
            first_attempt_ms: inner.first_attempt_ms,
            last_retry_ms: inner.last_retry_ms,
            connected_at_ms: inner.connected_at_ms,
            last_success_ms: inner.last_success_ms,
        }
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
