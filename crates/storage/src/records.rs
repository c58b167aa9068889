// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed rows over the raw collections.

use crate::store::collections;
use crate::{Store, StoreError};
use chrono::{DateTime, Utc};
use mcpproxy_core::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Runtime shadow of one upstream.
///
/// Derived state only; user intent stays in the config file. The
/// consecutive-failure counter is persisted here so restarts do not reset
/// auto-disable progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRecord {
    /// Last observed runtime state string.
    #[serde(default)]
    pub server_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disable_reason: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub ever_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_connection: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_count: usize,
}

/// Cached schema of one tool, keyed by `server:tool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadataRecord {
    pub server: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
    pub hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ToolMetadataRecord {
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.tool.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// OAuth token material for one upstream; the token dance itself is a
/// collaborator, this is just durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_type: String,
}

/// Cross-process rendezvous slot for a completed OAuth flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCompletionRecord {
    pub server: String,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn tool_key(server: &str, tool: &str) -> String {
    format!("{server}:{tool}")
}

fn tool_key_prefix(server: &str) -> String {
    format!("{server}:")
}

impl Store {
    pub fn upstream_record(&self, server: &str) -> Option<UpstreamRecord> {
        let value = self.get(collections::UPSTREAMS, server)?;
        serde_json::from_value(value).ok()
    }

    pub fn put_upstream_record(
        &self,
        server: &str,
        record: &UpstreamRecord,
    ) -> Result<(), StoreError> {
        self.put(collections::UPSTREAMS, server, serde_json::to_value(record)?)
    }

    pub fn delete_upstream(&self, server: &str) -> Result<(), StoreError> {
        self.tx(|tx| {
            tx.delete(collections::UPSTREAMS, server);
            tx.delete(collections::TOOL_HASH, server);
            tx.delete(collections::OAUTH_TOKENS, server);
            tx.delete(collections::OAUTH_COMPLETION, server);
            let prefix = tool_key_prefix(server);
            for key in tx.committed_keys(collections::TOOL_METADATA) {
                if key.starts_with(&prefix) {
                    tx.delete(collections::TOOL_METADATA, &key);
                }
            }
            Ok(())
        })
    }

    pub fn tool_hash(&self, server: &str) -> Option<String> {
        self.get(collections::TOOL_HASH, server)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Cached tool metadata for one upstream, tool-name ordered.
    pub fn tool_metadata(&self, server: &str) -> Vec<ToolMetadataRecord> {
        let prefix = tool_key_prefix(server);
        self.list(collections::TOOL_METADATA)
            .into_iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect()
    }

    /// Replace the cached tool list for one upstream in a single
    /// transaction: metadata rows, the list hash, and the record's tool
    /// count all move together.
    pub fn replace_tool_metadata(
        &self,
        server: &str,
        tools: &[ToolDescriptor],
        list_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let prefix = tool_key_prefix(server);
        self.tx(|tx| {
            let mut stale: Vec<String> = tx
                .committed_keys(collections::TOOL_METADATA)
                .into_iter()
                .filter(|k| k.starts_with(&prefix))
                .collect();

            for tool in tools {
                let key = tool_key(server, &tool.name);
                stale.retain(|k| k != &key);
                let first_seen = tx
                    .get(collections::TOOL_METADATA, &key)
                    .and_then(|v| serde_json::from_value::<ToolMetadataRecord>(v).ok())
                    .map(|r| r.first_seen)
                    .unwrap_or(now);
                let record = ToolMetadataRecord {
                    server: server.to_string(),
                    tool: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    hash: mcpproxy_core::tool::tool_hash(tool),
                    first_seen,
                    last_seen: now,
                };
                tx.put(collections::TOOL_METADATA, &key, serde_json::to_value(&record)?);
            }

            for key in stale {
                tx.delete(collections::TOOL_METADATA, &key);
            }

            tx.put(collections::TOOL_HASH, server, Value::String(list_hash.to_string()));
            Ok(())
        })
    }

    pub fn oauth_token(&self, server: &str) -> Option<OAuthTokenRecord> {
        let value = self.get(collections::OAUTH_TOKENS, server)?;
        serde_json::from_value(value).ok()
    }

    pub fn put_oauth_token(
        &self,
        server: &str,
        token: &OAuthTokenRecord,
    ) -> Result<(), StoreError> {
        self.put(collections::OAUTH_TOKENS, server, serde_json::to_value(token)?)
    }

    pub fn put_oauth_completion(
        &self,
        server: &str,
        record: &OAuthCompletionRecord,
    ) -> Result<(), StoreError> {
        self.put(
            collections::OAUTH_COMPLETION,
            server,
            serde_json::to_value(record)?,
        )
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
