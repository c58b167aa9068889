// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and streamable-HTTP transports.
//!
//! Plain HTTP posts one JSON-RPC frame per request and reads a JSON body.
//! Streamable-HTTP posts the same frame but accepts a `text/event-stream`
//! response body and correlates the reply by request id; the downstream's
//! `Mcp-Session-Id` header is echoed on subsequent requests.

use crate::jsonrpc::{self, methods, Request, RequestIds};
use crate::sse::SseParser;
use crate::{ClosedSignal, SessionInfo, Transport, TransportCtx, TransportError};
use async_trait::async_trait;
use futures_util::StreamExt;
use mcpproxy_config::UpstreamConfig;
use mcpproxy_core::{ServerName, ToolDescriptor};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpTransport {
    server: ServerName,
    url: String,
    headers: Vec<(String, String)>,
    bearer: Option<String>,
    timeout: Duration,
    streamable: bool,
    client: Option<reqwest::Client>,
    session_id: Option<String>,
    ids: RequestIds,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl HttpTransport {
    pub fn new(
        upstream: &UpstreamConfig,
        ctx: &TransportCtx,
        streamable: bool,
    ) -> Result<Self, TransportError> {
        let url = upstream
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TransportError::Unreachable("no url configured".to_string()))?;

        let (closed_tx, _) = watch::channel(false);
        Ok(Self {
            server: upstream.name.clone(),
            url,
            headers: upstream
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bearer: ctx.bearer_token.clone(),
            timeout: ctx.timeout,
            streamable,
            client: None,
            session_id: None,
            ids: RequestIds::default(),
            closed_tx: Arc::new(closed_tx),
        })
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.ids.next();
        let body = Request::new(id, method, params).to_value()?;
        let client = self.client.as_ref().ok_or(TransportError::Shutdown)?;

        let mut req = client
            .post(&self.url)
            .json(&body)
            .header(ACCEPT, "application/json, text/event-stream");
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }
        if let Some(session) = &self.session_id {
            req = req.header(SESSION_HEADER, session.as_str());
        }

        let resp = req.send().await.map_err(|e| map_reqwest_error(&e, self.timeout))?;

        if let Some(err) = status_to_error(resp.status()) {
            return Err(err);
        }

        if self.streamable {
            if let Some(session) = resp
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                self.session_id = Some(session.to_string());
            }
        }

        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let response = if is_stream {
            read_stream_response(resp, id, self.timeout).await?
        } else {
            let text = resp
                .text()
                .await
                .map_err(|e| map_reqwest_error(&e, self.timeout))?;
            jsonrpc::parse_response(&text)?
        };

        if response.id != Some(id) {
            debug!(server = %self.server, "response id mismatch");
        }
        jsonrpc::expect_result(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(format!("build http client: {e}")))?;
        self.client = Some(client);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<SessionInfo, TransportError> {
        let result = self
            .request(methods::INITIALIZE, jsonrpc::initialize_params())
            .await?;
        Ok(jsonrpc::parse_session_info(&result))
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let result = self.request(methods::TOOLS_LIST, Value::Null).await?;
        jsonrpc::parse_tools(&result)
    }

    async fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, TransportError> {
        self.request(methods::TOOLS_CALL, jsonrpc::call_params(name, args))
            .await
    }

    async fn close(&mut self) {
        self.client = None;
        self.session_id = None;
        let _ = self.closed_tx.send(true);
    }

    fn closed(&self) -> ClosedSignal {
        ClosedSignal::new(self.closed_tx.subscribe())
    }
}

/// Drain an SSE-framed response body until the frame matching `id` shows up.
async fn read_stream_response(
    resp: reqwest::Response,
    id: u64,
    timeout: Duration,
) -> Result<jsonrpc::Response, TransportError> {
    let mut stream = resp.bytes_stream();
    let mut parser = SseParser::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_reqwest_error(&e, timeout))?;
        for event in parser.push(&String::from_utf8_lossy(&chunk)) {
            if event.event != "message" {
                continue;
            }
            let response = jsonrpc::parse_response(&event.data)?;
            if response.id == Some(id) {
                return Ok(response);
            }
        }
    }

    Err(TransportError::Protocol(
        "event stream ended before the response arrived".to_string(),
    ))
}

/// Map HTTP status codes onto the transport error taxonomy.
pub(crate) fn status_to_error(status: StatusCode) -> Option<TransportError> {
    if status == StatusCode::UNAUTHORIZED {
        Some(TransportError::AuthRequired)
    } else if status == StatusCode::FORBIDDEN {
        Some(TransportError::AuthFailed(status.to_string()))
    } else if !status.is_success() {
        Some(TransportError::Unreachable(format!("http status {status}")))
    } else {
        None
    }
}

pub(crate) fn map_reqwest_error(e: &reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout)
    } else if e.is_connect() {
        TransportError::Unreachable(format!("connect: {e}"))
    } else if e.is_decode() {
        TransportError::Protocol(format!("decode: {e}"))
    } else {
        TransportError::Unreachable(e.to_string())
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
