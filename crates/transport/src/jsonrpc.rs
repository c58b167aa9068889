// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 framing for the MCP wire protocol.
//!
//! Frames are single JSON objects; the stdio transport delimits them with
//! newlines, the HTTP transports carry one per request body.

use crate::{SessionInfo, TransportError};
use mcpproxy_core::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this proxy speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Monotonic request-id source, one per transport instance.
#[derive(Debug, Default)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// One newline-terminated frame for stdio transports.
    pub fn to_line(&self) -> Result<String, TransportError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| TransportError::Protocol(format!("encode request: {e}")))?;
        line.push('\n');
        Ok(line)
    }

    pub fn to_value(&self) -> Result<Value, TransportError> {
        serde_json::to_value(self)
            .map_err(|e| TransportError::Protocol(format!("encode request: {e}")))
    }
}

/// A request without an id; no response will follow.
#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }

    pub fn to_line(&self) -> Result<String, TransportError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| TransportError::Protocol(format!("encode notification: {e}")))?;
        line.push('\n');
        Ok(line)
    }

    pub fn to_value(&self) -> Result<Value, TransportError> {
        serde_json::to_value(self)
            .map_err(|e| TransportError::Protocol(format!("encode notification: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications arriving on the same stream.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Decode one frame. Malformed JSON is a protocol error.
pub fn parse_response(raw: &str) -> Result<Response, TransportError> {
    serde_json::from_str(raw)
        .map_err(|e| TransportError::Protocol(format!("malformed response frame: {e}")))
}

/// Unwrap a response into its result, mapping downstream errors.
pub fn expect_result(response: Response) -> Result<Value, TransportError> {
    if let Some(error) = response.error {
        return Err(TransportError::Protocol(format!(
            "downstream error {}: {}",
            error.code, error.message
        )));
    }
    response
        .result
        .ok_or_else(|| TransportError::Protocol("response carries neither result nor error".to_string()))
}

/// Params for the `initialize` handshake.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": "mcpproxy",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Decode the `initialize` result.
pub fn parse_session_info(result: &Value) -> SessionInfo {
    SessionInfo {
        protocol_version: result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION)
            .to_string(),
        server_name: result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .map(str::to_string),
        server_version: result
            .pointer("/serverInfo/version")
            .and_then(Value::as_str)
            .map(str::to_string),
        capabilities: result.get("capabilities").cloned().unwrap_or(Value::Null),
    }
}

/// Decode a `tools/list` result.
pub fn parse_tools(result: &Value) -> Result<Vec<ToolDescriptor>, TransportError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::Protocol("tools/list result missing `tools` array".to_string()))?;
    tools
        .iter()
        .map(|t| {
            serde_json::from_value(t.clone())
                .map_err(|e| TransportError::Protocol(format!("malformed tool descriptor: {e}")))
        })
        .collect()
}

/// Params for a `tools/call` invocation.
pub fn call_params(name: &str, args: Value) -> Value {
    json!({ "name": name, "arguments": args })
}

#[cfg(test)]
#[path = "jsonrpc_tests.rs"]
mod tests;
