// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mcpproxy-engine: the per-upstream lifecycle machinery.
//!
//! A [`ManagedClient`] owns one upstream's state machine, transport slot and
//! retry policy, and runs as a single actor task. Connection attempts pass
//! through the bounded [`AdmissionGate`]; repeated failures accumulate into
//! auto-disable requests routed through the [`ModePersistence`] seam; rapid
//! restart cycles trip the [`RestartTracker`] regardless of the failure
//! threshold.

pub mod admission;
pub mod backoff;
pub mod client;
pub mod machine;
pub mod restart;

// Scripted fakes for engine and daemon tests.
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use admission::{AdmissionGate, AdmissionSlot};
pub use backoff::BackoffPolicy;
pub use client::{ClientDeps, ClientStatus, ManagedClient, ModePersistence, TransportFactory};
pub use machine::StateMachine;
pub use restart::{
    RestartTracker, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_COOLDOWN, DEFAULT_RESTART_WINDOW,
};

use mcpproxy_core::{RuntimeState, ServerName};
use thiserror::Error;

/// Reason string persisted when the consecutive-failure threshold fires.
pub const REASON_THRESHOLD: &str = "threshold exceeded";

/// Reason string persisted when the restart-loop tripwire fires.
pub const REASON_RESTART_LOOP: &str = "restart-loop";

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{server}: invalid transition {from} -> {to}")]
    InvalidTransition {
        server: ServerName,
        from: RuntimeState,
        to: RuntimeState,
    },

    #[error("admission acquire cancelled")]
    Cancelled,

    #[error("admission gate closed")]
    GateClosed,

    #[error("upstream {0} is not available")]
    NotAvailable(ServerName),

    #[error("timed out waiting for {0}")]
    WaitTimeout(String),

    #[error("mode change failed: {0}")]
    ModeChange(String),

    #[error(transparent)]
    Transport(#[from] mcpproxy_transport::TransportError),

    #[error(transparent)]
    Store(#[from] mcpproxy_storage::StoreError),

    #[error(transparent)]
    Config(#[from] mcpproxy_config::ConfigError),
}
