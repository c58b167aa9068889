// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted transport and persistence fakes for engine and daemon tests.

use crate::client::{ModePersistence, TransportFactory};
use crate::EngineError;
use async_trait::async_trait;
use mcpproxy_config::UpstreamConfig;
use mcpproxy_core::{ServerName, StartupMode, ToolDescriptor};
use mcpproxy_transport::{ClosedSignal, SessionInfo, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What one scripted connection attempt does.
#[derive(Clone)]
pub enum FakeOutcome {
    /// Connects and serves the given tools until told otherwise.
    Healthy(Vec<ToolDescriptor>),
    /// `open` fails with unreachable.
    OpenFails,
    /// `initialize` fails with auth-required.
    AuthRequired,
    /// Connects, then drops the connection after the delay.
    ReadyThenClose(Duration),
}

pub fn fake_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "read".to_string(),
            description: Some("read a file".to_string()),
            input_schema: json!({"type": "object"}),
        },
        ToolDescriptor {
            name: "write".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        },
    ]
}

pub struct FakeTransport {
    outcome: FakeOutcome,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl FakeTransport {
    pub fn new(outcome: FakeOutcome) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            outcome,
            closed_tx: Arc::new(closed_tx),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        match &self.outcome {
            FakeOutcome::OpenFails => {
                Err(TransportError::Unreachable("connection refused".to_string()))
            }
            FakeOutcome::ReadyThenClose(delay) => {
                let delay = *delay;
                let closed_tx = Arc::clone(&self.closed_tx);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = closed_tx.send(true);
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn initialize(&mut self) -> Result<SessionInfo, TransportError> {
        match &self.outcome {
            FakeOutcome::AuthRequired => Err(TransportError::AuthRequired),
            _ => Ok(SessionInfo {
                protocol_version: "2024-11-05".to_string(),
                server_name: Some("fake".to_string()),
                server_version: None,
                capabilities: Value::Null,
            }),
        }
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        match &self.outcome {
            FakeOutcome::Healthy(tools) => Ok(tools.clone()),
            _ => Ok(Vec::new()),
        }
    }

    async fn call_tool(&mut self, name: &str, _args: Value) -> Result<Value, TransportError> {
        Ok(json!({"echo": name}))
    }

    async fn close(&mut self) {
        let _ = self.closed_tx.send(true);
    }

    fn closed(&self) -> ClosedSignal {
        ClosedSignal::new(self.closed_tx.subscribe())
    }
}

/// Factory with a per-server outcome script and a shared fallback.
pub struct FakeFactory {
    per_server: Mutex<HashMap<String, VecDeque<FakeOutcome>>>,
    fallback: FakeOutcome,
    built: AtomicUsize,
    built_per: Mutex<HashMap<String, usize>>,
}

impl FakeFactory {
    pub fn new(fallback: FakeOutcome) -> Arc<Self> {
        Arc::new(Self {
            per_server: Mutex::new(HashMap::new()),
            fallback,
            built: AtomicUsize::new(0),
            built_per: Mutex::new(HashMap::new()),
        })
    }

    /// Queue the next outcome for one server; the script drains in order
    /// before the fallback applies.
    pub fn push(&self, server: &str, outcome: FakeOutcome) {
        self.per_server
            .lock()
            .entry(server.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Total transports built.
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn built_for(&self, server: &str) -> usize {
        self.built_per.lock().get(server).copied().unwrap_or(0)
    }
}

impl TransportFactory for FakeFactory {
    fn build(&self, upstream: &UpstreamConfig) -> Result<Box<dyn Transport>, TransportError> {
        self.built.fetch_add(1, Ordering::SeqCst);
        *self
            .built_per
            .lock()
            .entry(upstream.name.as_str().to_string())
            .or_default() += 1;
        let outcome = self
            .per_server
            .lock()
            .get_mut(upstream.name.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(FakeTransport::new(outcome)))
    }
}

/// Records mode changes; optionally fails to exercise rollback paths.
pub struct FakeModes {
    calls: Mutex<Vec<(ServerName, StartupMode, Option<String>)>>,
    pub fail: AtomicBool,
}

impl FakeModes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<(ServerName, StartupMode, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModePersistence for FakeModes {
    async fn set_startup_mode(
        &self,
        server: &ServerName,
        mode: StartupMode,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::ModeChange("config write failed".to_string()));
        }
        self.calls.lock().push((server.clone(), mode, reason));
        Ok(())
    }
}
