// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ErrorKind;
use mcpproxy_config::TransportKind;
use mcpproxy_core::StartupMode;
use serde_json::json;
use tempfile::tempdir;

fn ctx(dir: &std::path::Path, timeout: Duration) -> TransportCtx {
    TransportCtx {
        log_dir: dir.join("logs"),
        data_dir: dir.to_path_buf(),
        timeout,
        bearer_token: None,
    }
}

fn script_upstream(name: &str, script: &str) -> UpstreamConfig {
    let mut upstream = UpstreamConfig::new(name, TransportKind::Stdio, StartupMode::Active);
    upstream.command = Some("sh".to_string());
    upstream.args = vec!["-c".to_string(), script.to_string()];
    upstream
}

const FAKE_SERVER: &str = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"fake","version":"0.1"},"capabilities":{"tools":{}}}}'
read note
read line2
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"read","description":"read a file","inputSchema":{"type":"object"}}]}}'
read line3
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"ok"}]}}'
"#;

#[tokio::test]
async fn full_lifecycle_against_scripted_server() {
    let dir = tempdir().unwrap();
    let upstream = script_upstream("fake", FAKE_SERVER);
    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_secs(5))).unwrap();

    transport.open().await.unwrap();

    let info = transport.initialize().await.unwrap();
    assert_eq!(info.server_name.as_deref(), Some("fake"));
    assert_eq!(info.protocol_version, "2024-11-05");

    let tools = transport.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "read");

    let result = transport
        .call_tool("read", json!({"path": "/tmp/x"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "ok");

    transport.close().await;
    assert!(transport.closed().is_closed());
}

#[tokio::test]
async fn spawn_failure_is_unreachable() {
    let dir = tempdir().unwrap();
    let mut upstream = UpstreamConfig::new("ghost", TransportKind::Stdio, StartupMode::Active);
    upstream.command = Some("definitely-not-a-real-binary-xyz".to_string());

    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_secs(1))).unwrap();
    let err = transport.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unreachable);
}

#[tokio::test]
async fn unresponsive_server_times_out() {
    let dir = tempdir().unwrap();
    let upstream = script_upstream("slow", "read line; sleep 30");
    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_millis(200))).unwrap();

    transport.open().await.unwrap();
    let err = transport.initialize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    transport.close().await;
}

#[tokio::test]
async fn echo_server_is_a_protocol_error() {
    // `cat` echoes our own request back: a frame with an id but neither
    // result nor error.
    let dir = tempdir().unwrap();
    let mut upstream = UpstreamConfig::new("echo", TransportKind::Stdio, StartupMode::Active);
    upstream.command = Some("cat".to_string());

    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_secs(5))).unwrap();
    transport.open().await.unwrap();
    let err = transport.initialize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    transport.close().await;
}

#[tokio::test]
async fn child_exit_flips_closed_signal() {
    let dir = tempdir().unwrap();
    let upstream = script_upstream("oneshot", "exit 0");
    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_secs(1))).unwrap();

    transport.open().await.unwrap();
    let mut closed = transport.closed();
    tokio::time::timeout(Duration::from_secs(5), closed.wait())
        .await
        .expect("closed signal should fire after child exit");
    transport.close().await;
}

#[tokio::test]
async fn stderr_is_appended_to_per_server_log() {
    let dir = tempdir().unwrap();
    let upstream = script_upstream("noisy", "echo boom >&2; read line");
    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_secs(1))).unwrap();

    transport.open().await.unwrap();
    transport.close().await;

    let log = std::fs::read_to_string(dir.path().join("logs/noisy.log")).unwrap();
    assert!(log.contains("boom"), "stderr should land in the log: {log:?}");
}

#[tokio::test]
async fn request_after_close_is_shutdown() {
    let dir = tempdir().unwrap();
    let upstream = script_upstream("gone", FAKE_SERVER);
    let mut transport =
        StdioTransport::new(&upstream, None, &ctx(dir.path(), Duration::from_secs(1))).unwrap();

    transport.open().await.unwrap();
    transport.close().await;
    let err = transport.list_tools().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shutdown);
}
