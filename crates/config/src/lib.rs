// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mcpproxy-config: the single source of truth for user intent.
//!
//! Loads, validates, migrates and atomically rewrites the JSON config file,
//! exposes immutable snapshots plus a change stream, and watches the file
//! for external edits while suppressing reload loops from self-writes.

mod migration;
mod model;
mod store;
mod validate;
mod watcher;

pub use migration::migrate_value;
pub use model::{
    Config, DockerIsolationConfig, GroupConfig, IsolationConfig, OAuthConfig, TlsConfig,
    TransportKind, UpstreamConfig, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MAX_CONCURRENT_CONNECTIONS,
};
pub use store::{
    cleanup_backups, mutate_upstream, ChangeKind, ConfigStore, UpstreamChange,
    WATCH_SUPPRESS_WINDOW,
};
pub use validate::validate;
pub use watcher::ConfigWatcher;

use thiserror::Error;

/// Errors from config loading, validation, and persistence.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config root must be a JSON object")]
    NotAnObject,

    #[error("upstream with empty name")]
    EmptyName,

    #[error("duplicate upstream name: {0}")]
    DuplicateName(String),

    #[error("upstream {server}: {protocol} transport requires `{field}`")]
    MissingField {
        server: String,
        protocol: String,
        field: &'static str,
    },

    #[error("mutation rejected: {0}")]
    Rejected(String),

    #[error("config watcher error: {0}")]
    Watch(#[from] notify::Error),
}
