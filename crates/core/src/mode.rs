// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup modes, runtime states, and the application state.
//!
//! `StartupMode` is the persisted user intent for one upstream; it replaces
//! the legacy quartet of boolean flags (`enabled`, `quarantined`,
//! `auto_disabled`, `start_on_boot`). `RuntimeState` is the in-memory state
//! the managed client drives through its lifecycle; the disabled-family
//! modes mirror into matching runtime states with no transport open.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted intent for one upstream, stored in the config file and shadowed
/// in the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Connect at startup; keep connected.
    Active,
    /// Serve tools from cached metadata; connect on first call.
    LazyLoading,
    /// User-suppressed; never connect.
    Disabled,
    /// Security hold; never connect, tools hidden from search.
    Quarantined,
    /// System-suppressed after repeated failures.
    AutoDisabled,
}

impl StartupMode {
    /// True for the modes that forbid opening a transport.
    pub fn is_disabled_family(self) -> bool {
        matches!(
            self,
            StartupMode::Disabled | StartupMode::Quarantined | StartupMode::AutoDisabled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StartupMode::Active => "active",
            StartupMode::LazyLoading => "lazy_loading",
            StartupMode::Disabled => "disabled",
            StartupMode::Quarantined => "quarantined",
            StartupMode::AutoDisabled => "auto_disabled",
        }
    }
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory state of one upstream.
///
/// `Ready`, `Sleeping`, `Stopped` and the disabled-family states are stable:
/// nothing moves the upstream out of them without external input. The rest
/// are transient steps of the connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// Initial state after creation, before the lifecycle loop has run.
    NotStarted,
    /// Waiting on admission or dialing the transport.
    Connecting,
    /// OAuth or header exchange in flight.
    Authenticating,
    /// Fetching the tool list.
    Discovering,
    /// Transport open, serving calls; tool metadata is live.
    Ready,
    /// Lazy upstream with cached tools; connects on first call.
    Sleeping,
    /// Per-session stop; does not persist across restarts.
    Stopped,
    /// Last attempt failed; a retry is scheduled.
    Error,
    /// Mirrors `StartupMode::Disabled`.
    Disabled,
    /// Mirrors `StartupMode::Quarantined`.
    Quarantined,
    /// Mirrors `StartupMode::AutoDisabled`.
    AutoDisabled,
}

impl RuntimeState {
    /// Stable states: no autonomous transition leaves them.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            RuntimeState::Ready
                | RuntimeState::Sleeping
                | RuntimeState::Stopped
                | RuntimeState::Disabled
                | RuntimeState::Quarantined
                | RuntimeState::AutoDisabled
        )
    }

    /// Transient states: part of an in-flight connect cycle.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            RuntimeState::Connecting
                | RuntimeState::Authenticating
                | RuntimeState::Discovering
                | RuntimeState::Error
        )
    }

    /// True when this state requires the transport to be closed.
    pub fn forbids_transport(self) -> bool {
        matches!(
            self,
            RuntimeState::NotStarted
                | RuntimeState::Sleeping
                | RuntimeState::Stopped
                | RuntimeState::Error
                | RuntimeState::Disabled
                | RuntimeState::Quarantined
                | RuntimeState::AutoDisabled
        )
    }

    /// The runtime state that mirrors a disabled-family startup mode.
    /// Returns `None` for modes that drive the connect lifecycle instead.
    pub fn mirror(mode: StartupMode) -> Option<RuntimeState> {
        match mode {
            StartupMode::Disabled => Some(RuntimeState::Disabled),
            StartupMode::Quarantined => Some(RuntimeState::Quarantined),
            StartupMode::AutoDisabled => Some(RuntimeState::AutoDisabled),
            StartupMode::Active | StartupMode::LazyLoading => None,
        }
    }

    /// Whether the transition `self → to` is permitted.
    ///
    /// Self-transitions are rejected so that every accepted transition
    /// corresponds to exactly one event on the bus.
    pub fn can_transition(self, to: RuntimeState) -> bool {
        use RuntimeState::*;
        if self == to {
            return false;
        }
        match (self, to) {
            (NotStarted, Connecting | Sleeping | Disabled | Quarantined | AutoDisabled | Stopped) => {
                true
            }
            (Connecting, Authenticating | Discovering | Ready | Error | Stopped) => true,
            (Authenticating, Discovering | Error | Stopped) => true,
            (Discovering, Ready | Error | Stopped) => true,
            (Ready, Error | Stopped | Disabled | Quarantined) => true,
            (Error, Connecting | AutoDisabled | Stopped | Disabled | Quarantined) => true,
            (Sleeping, Connecting | Stopped | Disabled | Quarantined | AutoDisabled) => true,
            // Re-enable from any parked state goes back through NotStarted.
            (Disabled | Quarantined | AutoDisabled | Stopped, NotStarted) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeState::NotStarted => "not_started",
            RuntimeState::Connecting => "connecting",
            RuntimeState::Authenticating => "authenticating",
            RuntimeState::Discovering => "discovering",
            RuntimeState::Ready => "ready",
            RuntimeState::Sleeping => "sleeping",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Error => "error",
            RuntimeState::Disabled => "disabled",
            RuntimeState::Quarantined => "quarantined",
            RuntimeState::AutoDisabled => "auto_disabled",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-process state, derived from the per-upstream states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl AppState {
    pub fn as_str(self) -> &'static str {
        match self {
            AppState::Starting => "starting",
            AppState::Running => "running",
            AppState::Stopping => "stopping",
            AppState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "mode_tests.rs"]
mod tests;
