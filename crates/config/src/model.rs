// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration file model.
//!
//! Field names follow the on-disk JSON contract; `mcpServers` keeps its
//! camelCase spelling for compatibility with client config conventions.

use mcpproxy_core::{ServerName, StartupMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on simultaneous connection attempts.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 15;

/// Hard bounds on the admission gate capacity.
pub const MAX_CONCURRENT_CONNECTIONS_RANGE: std::ops::RangeInclusive<usize> = 1..=40;

/// Default per-attempt connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 60;

/// Hard bounds on the connection timeout in seconds.
pub const CONNECTION_TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 5..=300;

/// Default consecutive-failure threshold before auto-disable.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_connections() -> usize {
    DEFAULT_MAX_CONCURRENT_CONNECTIONS
}

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

/// Transport protocol of one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

impl TransportKind {
    pub fn is_http_family(self) -> bool {
        matches!(
            self,
            TransportKind::Http | TransportKind::Sse | TransportKind::StreamableHttp
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the client-facing server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory for the persistent store, logs, and container-id files.
    /// Resolved against the platform data dir when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,

    /// Per-attempt connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: Vec<UpstreamConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_isolation: Option<DockerIsolationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: None,
            log_level: default_log_level(),
            max_concurrent_connections: default_max_concurrent_connections(),
            connection_timeout: default_connection_timeout(),
            tls: None,
            mcp_servers: Vec::new(),
            groups: Vec::new(),
            docker_isolation: None,
            api_key: None,
        }
    }
}

impl Config {
    /// Admission gate capacity, clamped to the valid range.
    pub fn admission_capacity(&self) -> usize {
        self.max_concurrent_connections
            .clamp(*MAX_CONCURRENT_CONNECTIONS_RANGE.start(), *MAX_CONCURRENT_CONNECTIONS_RANGE.end())
    }

    /// Per-attempt connection timeout, clamped to the valid range.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connection_timeout
                .clamp(*CONNECTION_TIMEOUT_RANGE_SECS.start(), *CONNECTION_TIMEOUT_RANGE_SECS.end()),
        )
    }

    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.mcp_servers.iter().find(|u| u.name == name)
    }

    pub fn upstream_mut(&mut self, name: &str) -> Option<&mut UpstreamConfig> {
        self.mcp_servers.iter_mut().find(|u| u.name == name)
    }

    /// Upstreams belonging to the given group.
    pub fn group_members(&self, group: u64) -> impl Iterator<Item = &UpstreamConfig> {
        self.mcp_servers.iter().filter(move |u| u.group == Some(group))
    }
}

/// One downstream MCP server in `mcpServers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: ServerName,
    pub protocol: TransportKind,
    pub startup_mode: StartupMode,

    // stdio fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Child environment. Must include `PATH` explicitly: the daemon does
    /// not inherit the user's shell profile.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationConfig>,

    // http-family fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,

    // scheduling and failure policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u64>,
    /// Per-instance override of the consecutive-failure threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    /// Per-instance override of the restart-loop tripwire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    /// Why the system demoted this upstream, when `startup_mode` is
    /// `auto_disabled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disable_reason: Option<String>,
    /// The mode the user had chosen before auto-disable, restored on
    /// clearance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user_mode: Option<StartupMode>,
}

impl UpstreamConfig {
    pub fn new(name: impl Into<ServerName>, protocol: TransportKind, startup_mode: StartupMode) -> Self {
        Self {
            name: name.into(),
            protocol,
            startup_mode,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            isolation: None,
            url: None,
            headers: BTreeMap::new(),
            oauth: None,
            group: None,
            failure_threshold: None,
            max_restarts: None,
            auto_disable_reason: None,
            last_user_mode: None,
        }
    }

    /// Effective consecutive-failure threshold.
    pub fn effective_failure_threshold(&self) -> u32 {
        self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD)
    }

    /// True when `other` differs in a field that defines the transport, so
    /// an open connection must be recycled rather than mutated in place.
    pub fn transport_fields_changed(&self, other: &Self) -> bool {
        self.protocol != other.protocol
            || self.command != other.command
            || self.args != other.args
            || self.env != other.env
            || self.working_dir != other.working_dir
            || self.isolation != other.isolation
            || self.url != other.url
            || self.headers != other.headers
            || self.oauth != other.oauth
    }
}

/// Named group of upstreams for bulk operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: u64,
    pub name: String,
}

/// TLS material for the client-facing listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Per-upstream sandbox settings for stdio children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

/// Workspace-wide docker defaults applied when an upstream enables
/// isolation without naming an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerIsolationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

/// OAuth binding handed to the token collaborator; the core only persists
/// the resulting tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
