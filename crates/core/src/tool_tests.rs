// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn tool(name: &str, desc: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: Some(desc.to_string()),
        input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
    }
}

#[test]
fn hash_is_order_independent() {
    let a = tool("read", "read a file");
    let b = tool("write", "write a file");
    assert_eq!(tool_list_hash(&[a.clone(), b.clone()]), tool_list_hash(&[b, a]));
}

#[test]
fn hash_changes_with_schema_drift() {
    let before = tool("read", "read a file");
    let mut after = before.clone();
    after.input_schema = json!({"type": "object", "properties": {}});
    assert_ne!(tool_list_hash(&[before]), tool_list_hash(&[after]));
}

#[test]
fn hash_changes_with_description() {
    let before = tool("read", "read a file");
    let mut after = before.clone();
    after.description = Some("read file contents".to_string());
    assert_ne!(tool_hash(&before), tool_hash(&after));
}

#[test]
fn empty_list_has_stable_hash() {
    assert_eq!(tool_list_hash(&[]), tool_list_hash(&[]));
}

#[test]
fn descriptor_serde_uses_mcp_field_names() {
    let t = tool("read", "read a file");
    let json = serde_json::to_value(&t).unwrap();
    assert!(json.get("inputSchema").is_some());
    let back: ToolDescriptor = serde_json::from_value(json).unwrap();
    assert_eq!(back, t);
}
