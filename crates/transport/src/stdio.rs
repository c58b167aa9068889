// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdio transport: a spawned child speaking newline-delimited JSON-RPC.
//!
//! Requests go out on stdin, responses come back on stdout via a reader
//! task that resolves pending calls by id, and stderr is appended verbatim
//! to the per-server log file. Teardown escalates SIGTERM to SIGKILL after
//! a grace period. With isolation enabled the child runs under docker and
//! a `mcpproxy-cid-*` file is left for the orphan reaper.

use crate::jsonrpc::{self, methods, Notification, Request, RequestIds, Response};
use crate::{ClosedSignal, SessionInfo, Transport, TransportCtx, TransportError};
use async_trait::async_trait;
use mcpproxy_config::{DockerIsolationConfig, UpstreamConfig};
use mcpproxy_core::{ServerName, ToolDescriptor};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a child gets between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

struct Isolation {
    image: String,
    extra_args: Vec<String>,
    cid_dir: PathBuf,
}

pub struct StdioTransport {
    server: ServerName,
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    isolation: Option<Isolation>,
    stderr_log: PathBuf,
    timeout: Duration,
    ids: RequestIds,
    pending: PendingMap,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    closed_tx: Arc<watch::Sender<bool>>,
    cid_file: Option<PathBuf>,
}

impl StdioTransport {
    pub fn new(
        upstream: &UpstreamConfig,
        docker: Option<&DockerIsolationConfig>,
        ctx: &TransportCtx,
    ) -> Result<Self, TransportError> {
        let command = upstream
            .command
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TransportError::Unreachable("no command configured".to_string()))?;

        let isolation = match &upstream.isolation {
            Some(iso) if iso.enabled => {
                let image = iso
                    .image
                    .clone()
                    .or_else(|| docker.and_then(|d| d.default_image.clone()))
                    .ok_or_else(|| {
                        TransportError::Unreachable("isolation enabled but no image configured".to_string())
                    })?;
                let mut extra_args = docker.map(|d| d.extra_args.clone()).unwrap_or_default();
                extra_args.extend(iso.extra_args.clone());
                Some(Isolation {
                    image,
                    extra_args,
                    cid_dir: ctx.data_dir.clone(),
                })
            }
            _ => None,
        };

        let (closed_tx, _) = watch::channel(false);
        Ok(Self {
            server: upstream.name.clone(),
            command,
            args: upstream.args.clone(),
            env: upstream.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            working_dir: upstream.working_dir.clone(),
            isolation,
            stderr_log: ctx.log_dir.join(format!("{}.log", sanitize(upstream.name.as_str()))),
            timeout: ctx.timeout,
            ids: RequestIds::default(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            child: None,
            stdin: None,
            reader: None,
            closed_tx: Arc::new(closed_tx),
            cid_file: None,
        })
    }

    /// Program and argv, with the docker wrapper applied when isolated.
    fn effective_command(&mut self) -> (String, Vec<String>) {
        match &self.isolation {
            None => (self.command.clone(), self.args.clone()),
            Some(iso) => {
                let cid = iso.cid_dir.join(format!(
                    "mcpproxy-cid-{}-{}",
                    sanitize(self.server.as_str()),
                    &uuid::Uuid::new_v4().to_string()[..8]
                ));
                self.cid_file = Some(cid.clone());

                let mut args = vec![
                    "run".to_string(),
                    "--rm".to_string(),
                    "-i".to_string(),
                    "--cidfile".to_string(),
                    cid.display().to_string(),
                ];
                for (k, v) in &self.env {
                    args.push("-e".to_string());
                    args.push(format!("{k}={v}"));
                }
                args.extend(iso.extra_args.clone());
                args.push(iso.image.clone());
                args.push(self.command.clone());
                args.extend(self.args.clone());
                ("docker".to_string(), args)
            }
        }
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Response, TransportError> {
        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let line = Request::new(id, method, params).to_line()?;
        if let Err(e) = self.write_frame(&line).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Shutdown),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), TransportError> {
        let line = Notification::new(method, params).to_line()?;
        self.write_frame(&line).await
    }

    async fn write_frame(&mut self, line: &str) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Shutdown)?;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Unreachable(format!("write to child: {e}"))),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let (program, args) = self.effective_command();

        if let Some(parent) = self.stderr_log.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TransportError::Unreachable(format!("create log dir: {e}")))?;
        }
        let stderr_log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.stderr_log)
            .map_err(|e| TransportError::Unreachable(format!("open stderr log: {e}")))?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // PATH comes from the configured env; the daemon does not inherit
        // the user's shell profile.
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Unreachable(format!("spawn `{program}`: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("child stdout not captured".to_string()))?;
        self.stdin = child.stdin.take();

        let pending = Arc::clone(&self.pending);
        let closed_tx = Arc::clone(&self.closed_tx);
        let server = self.server.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match jsonrpc::parse_response(trimmed) {
                            Ok(response) => match response.id {
                                Some(id) => {
                                    if let Some(tx) = pending.lock().remove(&id) {
                                        let _ = tx.send(response);
                                    }
                                }
                                None => debug!(server = %server, "ignoring downstream notification"),
                            },
                            Err(e) => {
                                warn!(server = %server, error = %e, "unparseable frame from child")
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            // EOF: fail every pending call and flag the disconnect.
            pending.lock().clear();
            let _ = closed_tx.send(true);
        }));

        self.child = Some(child);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<SessionInfo, TransportError> {
        let response = self
            .request(methods::INITIALIZE, jsonrpc::initialize_params())
            .await?;
        let result = jsonrpc::expect_result(response)?;
        let info = jsonrpc::parse_session_info(&result);
        self.notify(methods::INITIALIZED, Value::Null).await?;
        Ok(info)
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let response = self.request(methods::TOOLS_LIST, Value::Null).await?;
        let result = jsonrpc::expect_result(response)?;
        jsonrpc::parse_tools(&result)
    }

    async fn call_tool(&mut self, name: &str, args: Value) -> Result<Value, TransportError> {
        let response = self
            .request(methods::TOOLS_CALL, jsonrpc::call_params(name, args))
            .await?;
        jsonrpc::expect_result(response)
    }

    async fn close(&mut self) {
        // Closing stdin lets a well-behaved server exit on its own.
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                warn!(server = %self.server, "child ignored SIGTERM, sending SIGKILL");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(cid) = self.cid_file.take() {
            let _ = std::fs::remove_file(cid);
        }
        self.pending.lock().clear();
        let _ = self.closed_tx.send(true);
    }

    fn closed(&self) -> ClosedSignal {
        ClosedSignal::new(self.closed_tx.subscribe())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop handles the child; the reader exits on EOF, but an
        // abort here frees it immediately when dropped mid-connect.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(cid) = self.cid_file.take() {
            let _ = std::fs::remove_file(cid);
        }
    }
}

/// Keep per-server file names shell-friendly.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect()
}

#[cfg(test)]
#[path = "stdio_tests.rs"]
mod tests;
