// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mcpproxy-storage: the embedded key-value store.
//!
//! A JSONL append-only op log with an in-memory index, holding the runtime
//! shadow of every upstream: state records, cached tool metadata, tool-list
//! hashes, OAuth tokens, and the schema version. The log is rewritten in
//! place (tmp + rename) once it crosses the compaction threshold.
//!
//! User intent lives in the config file; this store holds only what runtime
//! derives. The pair is kept consistent by the persistence coordinator.

mod log;
mod records;
mod store;

pub use log::{LogEntry, Op, OpLog};
pub use records::{OAuthCompletionRecord, OAuthTokenRecord, ToolMetadataRecord, UpstreamRecord};
pub use store::{collections, Store, Tx, COMPACTION_THRESHOLD_BYTES, CURRENT_SCHEMA_VERSION};

use thiserror::Error;

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt entry at offset {offset}: {message}")]
    Corrupt { offset: u64, message: String },

    #[error("store schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: u64, supported: u64 },

    #[error("transaction rejected: {0}")]
    Rejected(String),
}
