// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mcpproxy-daemon: the process shell around the lifecycle core.
//!
//! Wires the config store, persistent store, admission gate and managed
//! clients together; derives the aggregate application state; persists
//! mode changes with rollback; and handles signals, logging and orphaned
//! container cleanup.

pub mod app_state;
pub mod coordinator;
pub mod logging;
pub mod manager;
pub mod reaper;
pub mod transport_factory;

pub use app_state::AppStateTracker;
pub use coordinator::StatePersistenceCoordinator;
pub use manager::UpstreamManager;
pub use transport_factory::DaemonTransportFactory;

use thiserror::Error;

/// Exit codes per the operator contract.
pub mod exit_codes {
    /// Clean shutdown.
    pub const OK: i32 = 0;
    /// Any other fatal error.
    pub const FATAL: i32 = 1;
    /// Configuration error at startup.
    pub const CONFIG: i32 = 2;
    /// Persistent-store corruption or schema mismatch.
    pub const STORE: i32 = 3;
}

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine data directory")]
    NoDataDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] mcpproxy_config::ConfigError),

    #[error(transparent)]
    Store(#[from] mcpproxy_storage::StoreError),

    #[error(transparent)]
    Engine(#[from] mcpproxy_engine::EngineError),
}

impl DaemonError {
    /// Process exit code for a startup failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Config(_) => exit_codes::CONFIG,
            DaemonError::Store(mcpproxy_storage::StoreError::Corrupt { .. })
            | DaemonError::Store(mcpproxy_storage::StoreError::SchemaTooNew { .. }) => {
                exit_codes::STORE
            }
            _ => exit_codes::FATAL,
        }
    }
}
