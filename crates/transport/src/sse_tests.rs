// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_single_event() {
    let mut parser = SseParser::default();
    let events = parser.push("event: endpoint\ndata: /messages?session=1\n\n");
    assert_eq!(
        events,
        vec![SseEvent {
            event: "endpoint".to_string(),
            data: "/messages?session=1".to_string(),
        }]
    );
}

#[test]
fn default_event_name_is_message() {
    let mut parser = SseParser::default();
    let events = parser.push("data: {\"id\":1}\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "message");
}

#[test]
fn handles_arbitrary_chunk_boundaries() {
    let mut parser = SseParser::default();
    let mut events = Vec::new();
    for chunk in ["eve", "nt: mess", "age\nda", "ta: hel", "lo\n", "\n"] {
        events.extend(parser.push(chunk));
    }
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data, "hello");
}

#[test]
fn joins_multiple_data_lines() {
    let mut parser = SseParser::default();
    let events = parser.push("data: line1\ndata: line2\n\n");
    assert_eq!(events[0].data, "line1\nline2");
}

#[test]
fn ignores_comments_and_unknown_fields() {
    let mut parser = SseParser::default();
    let events = parser.push(": keep-alive\nid: 42\nretry: 1000\ndata: x\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data, "x");
}

#[test]
fn tolerates_crlf_line_endings() {
    let mut parser = SseParser::default();
    let events = parser.push("event: message\r\ndata: y\r\n\r\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "message");
    assert_eq!(events[0].data, "y");
}

#[test]
fn blank_line_without_data_emits_nothing() {
    let mut parser = SseParser::default();
    assert!(parser.push("\n\n\n").is_empty());
    assert!(parser.push("event: message\n\n").is_empty());
}

#[test]
fn consecutive_events_in_one_chunk() {
    let mut parser = SseParser::default();
    let events = parser.push("data: a\n\ndata: b\n\n");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].data, "a");
    assert_eq!(events[1].data, "b");
}

#[test]
fn data_without_space_after_colon() {
    let mut parser = SseParser::default();
    let events = parser.push("data:tight\n\n");
    assert_eq!(events[0].data, "tight");
}

use crate::ErrorKind;
use mcpproxy_config::TransportKind;
use mcpproxy_core::StartupMode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn sse_ctx() -> TransportCtx {
    TransportCtx {
        log_dir: std::env::temp_dir(),
        data_dir: std::env::temp_dir(),
        timeout: Duration::from_secs(2),
        bearer_token: None,
    }
}

async fn stream_server(frames: &'static str, hold_open: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 2048];
        let _ = sock.read(&mut buf).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";
        let _ = sock.write_all(head.as_bytes()).await;
        let _ = sock.write_all(frames.as_bytes()).await;
        if hold_open {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    });
    format!("http://{addr}/sse")
}

#[tokio::test]
async fn open_resolves_endpoint_from_stream() {
    let url = stream_server("event: endpoint\ndata: /messages?session=abc\n\n", true).await;

    let mut upstream = UpstreamConfig::new("sse", TransportKind::Sse, StartupMode::Active);
    upstream.url = Some(url);
    let mut transport = SseTransport::new(&upstream, &sse_ctx()).unwrap();

    transport.open().await.unwrap();
    transport.close().await;
    assert!(transport.closed().is_closed());
}

#[tokio::test]
async fn stream_ending_before_endpoint_fails_open() {
    let url = stream_server(": hello\n\n", false).await;

    let mut upstream = UpstreamConfig::new("sse", TransportKind::Sse, StartupMode::Active);
    upstream.url = Some(url);
    let mut transport = SseTransport::new(&upstream, &sse_ctx()).unwrap();

    let err = transport.open().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Protocol | ErrorKind::Timeout));
}
