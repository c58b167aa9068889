// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE transport: long-lived GET event stream with a paired POST endpoint.
//!
//! The downstream's first `endpoint` event advertises where requests go;
//! responses come back as `message` events on the stream and are matched to
//! pending requests by id. Reconnection is the managed client's job.

use crate::http::{map_reqwest_error, status_to_error};
use crate::jsonrpc::{self, methods, Notification, Request, RequestIds, Response};
use crate::{ClosedSignal, SessionInfo, Transport, TransportCtx, TransportError};
use async_trait::async_trait;
use futures_util::StreamExt;
use mcpproxy_config::UpstreamConfig;
use mcpproxy_core::{ServerName, ToolDescriptor};
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One server-sent event after framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser over `text/event-stream` bytes.
///
/// Feed arbitrary chunk boundaries; complete events come out as soon as
/// their terminating blank line arrives.
#[derive(Default)]
pub struct SseParser {
    buf: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                // Comment / keep-alive.
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

pub struct SseTransport {
    server: ServerName,
    url: String,
    headers: Vec<(String, String)>,
    bearer: Option<String>,
    timeout: Duration,
    client: Option<reqwest::Client>,
    endpoint: Option<reqwest::Url>,
    ids: RequestIds,
    pending: PendingMap,
    reader: Option<JoinHandle<()>>,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl SseTransport {
    pub fn new(upstream: &UpstreamConfig, ctx: &TransportCtx) -> Result<Self, TransportError> {
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
            client: None,
            endpoint: None,
            ids: RequestIds::default(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: None,
            closed_tx: Arc::new(closed_tx),
        })
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.ids.next();
        let body = Request::new(id, method, params).to_value()?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.post(&body).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(TransportError::Shutdown),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(TransportError::Timeout(self.timeout));
            }
        };
        jsonrpc::expect_result(response)
    }

    async fn post(&self, body: &Value) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::Shutdown)?;
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| TransportError::Protocol("no endpoint advertised".to_string()))?;

        let mut req = client.post(endpoint).json(body).timeout(self.timeout);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| map_reqwest_error(&e, self.timeout))?;
        match status_to_error(resp.status()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        // No whole-client timeout: the GET stream lives as long as the
        // connection. POSTs get a per-request timeout instead.
        let client = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(format!("build http client: {e}")))?;

        let mut req = client.get(&self.url).header(ACCEPT, "text/event-stream");
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }

        let resp = match tokio::time::timeout(self.timeout, req.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(map_reqwest_error(&e, self.timeout)),
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        };
        if let Some(err) = status_to_error(resp.status()) {
            return Err(err);
        }

        let base = reqwest::Url::parse(&self.url)
            .map_err(|e| TransportError::Protocol(format!("invalid url: {e}")))?;
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<reqwest::Url>();

        let pending = Arc::clone(&self.pending);
        let closed_tx = Arc::clone(&self.closed_tx);
        let server = self.server.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseParser::default();
            let mut stream = resp.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                for event in parser.push(&String::from_utf8_lossy(&chunk)) {
                    match event.event.as_str() {
                        "endpoint" => match base.join(event.data.trim()) {
                            Ok(url) => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(url);
                                }
                            }
                            Err(e) => {
                                warn!(server = %server, error = %e, "bad endpoint event")
                            }
                        },
                        "message" => match jsonrpc::parse_response(&event.data) {
                            Ok(response) => match response.id {
                                Some(id) => {
                                    if let Some(tx) = pending.lock().remove(&id) {
                                        let _ = tx.send(response);
                                    }
                                }
                                None => debug!(server = %server, "ignoring stream notification"),
                            },
                            Err(e) => warn!(server = %server, error = %e, "unparseable stream frame"),
                        },
                        _ => {}
                    }
                }
            }
            pending.lock().clear();
            let _ = closed_tx.send(true);
        }));

        self.client = Some(client);
        self.endpoint = match tokio::time::timeout(self.timeout, endpoint_rx).await {
            Ok(Ok(url)) => Some(url),
            Ok(Err(_)) => {
                return Err(TransportError::Protocol(
                    "stream closed before the endpoint event".to_string(),
                ))
            }
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        };
        Ok(())
    }

    async fn initialize(&mut self) -> Result<SessionInfo, TransportError> {
        let result = self
            .request(methods::INITIALIZE, jsonrpc::initialize_params())
            .await?;
        let info = jsonrpc::parse_session_info(&result);
        let note = Notification::new(methods::INITIALIZED, Value::Null).to_value()?;
        self.post(&note).await?;
        Ok(info)
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
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.client = None;
        self.endpoint = None;
        self.pending.lock().clear();
        let _ = self.closed_tx.send(true);
    }

    fn closed(&self) -> ClosedSignal {
        ClosedSignal::new(self.closed_tx.subscribe())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        // A transport abandoned mid-connect must not leave its stream
        // reader running.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
