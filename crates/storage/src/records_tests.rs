// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use mcpproxy_core::tool_list_hash;
use serde_json::json;
use tempfile::tempdir;

fn open_store(dir: &std::path::Path) -> Store {
    Store::open(&dir.join("store.db")).unwrap()
}

fn t(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: Some(format!("{name} a file")),
        input_schema: json!({"type": "object"}),
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[test]
fn upstream_record_roundtrip() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    assert!(store.upstream_record("fs").is_none());

    let record = UpstreamRecord {
        server_state: "auto_disabled".to_string(),
        auto_disable_reason: Some("threshold exceeded".to_string()),
        consecutive_failures: 5,
        ever_connected: true,
        last_successful_connection: Some(now()),
        tool_count: 11,
    };
    store.put_upstream_record("fs", &record).unwrap();
    assert_eq!(store.upstream_record("fs").unwrap(), record);
}

#[test]
fn replace_tool_metadata_swaps_cache_and_hash() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    let first = vec![t("read"), t("write")];
    let hash1 = tool_list_hash(&first);
    store.replace_tool_metadata("fs", &first, &hash1, now()).unwrap();

    assert_eq!(store.tool_hash("fs").as_deref(), Some(hash1.as_str()));
    let cached = store.tool_metadata("fs");
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().any(|r| r.tool == "read"));

    // Re-discovery drops tools that disappeared and keeps first_seen for
    // survivors.
    let second = vec![t("read"), t("stat")];
    let hash2 = tool_list_hash(&second);
    let later = now() + chrono::Duration::hours(1);
    store.replace_tool_metadata("fs", &second, &hash2, later).unwrap();

    let cached = store.tool_metadata("fs");
    assert_eq!(cached.len(), 2);
    assert!(!cached.iter().any(|r| r.tool == "write"));
    let read = cached.iter().find(|r| r.tool == "read").unwrap();
    assert_eq!(read.first_seen, now());
    assert_eq!(read.last_seen, later);
    assert_eq!(store.tool_hash("fs").as_deref(), Some(hash2.as_str()));
}

#[test]
fn tool_metadata_is_scoped_per_server() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    store
        .replace_tool_metadata("fs", &[t("read")], "h1", now())
        .unwrap();
    store
        .replace_tool_metadata("gh", &[t("search"), t("clone")], "h2", now())
        .unwrap();

    assert_eq!(store.tool_metadata("fs").len(), 1);
    assert_eq!(store.tool_metadata("gh").len(), 2);
}

#[test]
fn delete_upstream_clears_every_collection() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    store.put_upstream_record("fs", &UpstreamRecord::default()).unwrap();
    store.replace_tool_metadata("fs", &[t("read")], "h", now()).unwrap();
    store
        .put_oauth_token(
            "fs",
            &OAuthTokenRecord {
                access_token: "tok".to_string(),
                refresh_token: None,
                expires_at: None,
                token_type: "bearer".to_string(),
            },
        )
        .unwrap();

    store.delete_upstream("fs").unwrap();

    assert!(store.upstream_record("fs").is_none());
    assert!(store.tool_hash("fs").is_none());
    assert!(store.tool_metadata("fs").is_empty());
    assert!(store.oauth_token("fs").is_none());
}

#[test]
fn cached_descriptor_reconstructs_tool() {
    let tool = t("read");
    let record = ToolMetadataRecord {
        server: "fs".to_string(),
        tool: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
        hash: "h".to_string(),
        first_seen: now(),
        last_seen: now(),
    };
    assert_eq!(record.descriptor(), tool);
}

#[test]
fn oauth_completion_roundtrip() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    let record = OAuthCompletionRecord {
        server: "gh".to_string(),
        completed_at: now(),
        success: false,
        error: Some("denied".to_string()),
    };
    store.put_oauth_completion("gh", &record).unwrap();
    let raw = store.get(collections::OAUTH_COMPLETION, "gh").unwrap();
    let back: OAuthCompletionRecord = serde_json::from_value(raw).unwrap();
    assert_eq!(back, record);
}
