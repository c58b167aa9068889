// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mcpproxy-transport: protocol clients for downstream MCP servers.
//!
//! One [`Transport`] per connection attempt. The stdio variant spawns a
//! child process speaking line-delimited JSON-RPC; the HTTP variants post
//! frames to a remote endpoint; SSE holds a long-lived event stream with a
//! paired POST endpoint. Reconnection policy lives a layer up in the
//! managed client, never here.

pub mod http;
pub mod jsonrpc;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use mcpproxy_config::{Config, TransportKind, UpstreamConfig};
use mcpproxy_core::ToolDescriptor;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::{StdioTransport, KILL_GRACE};

/// Failure classes every transport operation maps onto. The state machine
/// keys its next state off [`TransportError::kind`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("transport shut down")]
    Shutdown,
}

/// Kind tags for [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unreachable,
    Timeout,
    Protocol,
    AuthRequired,
    AuthFailed,
    Shutdown,
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Unreachable(_) => ErrorKind::Unreachable,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Protocol(_) => ErrorKind::Protocol,
            TransportError::AuthRequired => ErrorKind::AuthRequired,
            TransportError::AuthFailed(_) => ErrorKind::AuthFailed,
            TransportError::Shutdown => ErrorKind::Shutdown,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.kind(), ErrorKind::AuthRequired | ErrorKind::AuthFailed)
    }

    /// Authentication problems are surfaced to the user instead of counting
    /// toward auto-disable.
    pub fn counts_toward_auto_disable(&self) -> bool {
        !self.is_auth()
    }
}

/// Result of a successful `initialize` exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub protocol_version: String,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub capabilities: Value,
}

/// Watchable signal that flips once the underlying connection is gone.
///
/// HTTP transports have no persistent connection, so their signal only
/// fires on explicit close.
#[derive(Clone)]
pub struct ClosedSignal {
    rx: watch::Receiver<bool>,
}

impl ClosedSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the transport reports closed.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Uniform capability interface over all transport variants.
///
/// `open` establishes the connection, `initialize` performs the MCP
/// handshake, `list_tools` discovers the tool surface, `call_tool`
/// forwards one invocation, `close` releases resources. Each operation
/// fails with one of the [`TransportError`] classes.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), TransportError>;
    async fn initialize(&mut self) -> Result<SessionInfo, TransportError>;
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError>;
    async fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, TransportError>;
    async fn close(&mut self);

    /// Handle for observing disconnects without holding the transport.
    fn closed(&self) -> ClosedSignal;
}

/// Ambient inputs a transport needs beyond the upstream's own config.
#[derive(Debug, Clone)]
pub struct TransportCtx {
    /// Directory for per-server stderr logs.
    pub log_dir: PathBuf,
    /// Directory for container-id files (`mcpproxy-cid-*`).
    pub data_dir: PathBuf,
    /// Per-operation timeout; the configured `connection_timeout` applies
    /// to every attempt, retries included.
    pub timeout: Duration,
    /// Bearer token minted by the OAuth collaborator, if any.
    pub bearer_token: Option<String>,
}

/// Build the transport variant for one upstream.
pub fn build_transport(
    upstream: &UpstreamConfig,
    config: &Config,
    ctx: &TransportCtx,
) -> Result<Box<dyn Transport>, TransportError> {
    match upstream.protocol {
        TransportKind::Stdio => Ok(Box::new(StdioTransport::new(
            upstream,
            config.docker_isolation.as_ref(),
            ctx,
        )?)),
        TransportKind::Http => Ok(Box::new(HttpTransport::new(upstream, ctx, false)?)),
        TransportKind::StreamableHttp => Ok(Box::new(HttpTransport::new(upstream, ctx, true)?)),
        TransportKind::Sse => Ok(Box::new(SseTransport::new(upstream, ctx)?)),
    }
}
