// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn minimal_config_uses_defaults() {
    let config: Config = serde_json::from_value(json!({})).unwrap();
    assert_eq!(config.listen, "127.0.0.1:8080");
    assert_eq!(config.log_level, "info");
    assert_eq!(config.max_concurrent_connections, DEFAULT_MAX_CONCURRENT_CONNECTIONS);
    assert_eq!(config.connection_timeout, DEFAULT_CONNECTION_TIMEOUT_SECS);
    assert!(config.mcp_servers.is_empty());
}

#[test]
fn transport_kind_wire_names() {
    assert_eq!(serde_json::to_string(&TransportKind::Stdio).unwrap(), r#""stdio""#);
    assert_eq!(serde_json::to_string(&TransportKind::Http).unwrap(), r#""http""#);
    assert_eq!(serde_json::to_string(&TransportKind::Sse).unwrap(), r#""sse""#);
    assert_eq!(
        serde_json::to_string(&TransportKind::StreamableHttp).unwrap(),
        r#""streamable-http""#
    );
}

#[test]
fn upstream_parses_stdio_fields() {
    let upstream: UpstreamConfig = serde_json::from_value(json!({
        "name": "fs",
        "protocol": "stdio",
        "startup_mode": "lazy_loading",
        "command": "mcp-fs",
        "args": ["--root", "/srv"],
        "env": {"PATH": "/usr/bin:/bin"},
        "working_dir": "/srv"
    }))
    .unwrap();

    assert_eq!(upstream.name, "fs");
    assert_eq!(upstream.protocol, TransportKind::Stdio);
    assert_eq!(upstream.startup_mode, StartupMode::LazyLoading);
    assert_eq!(upstream.command.as_deref(), Some("mcp-fs"));
    assert_eq!(upstream.env.get("PATH").map(String::as_str), Some("/usr/bin:/bin"));
}

#[test]
fn upstream_requires_startup_mode() {
    let result: Result<UpstreamConfig, _> = serde_json::from_value(json!({
        "name": "fs",
        "protocol": "stdio",
        "command": "mcp-fs"
    }));
    assert!(result.is_err());
}

#[test]
fn admission_capacity_is_clamped() {
    let mut config = Config::default();
    config.max_concurrent_connections = 0;
    assert_eq!(config.admission_capacity(), 1);
    config.max_concurrent_connections = 500;
    assert_eq!(config.admission_capacity(), 40);
    config.max_concurrent_connections = 15;
    assert_eq!(config.admission_capacity(), 15);
}

#[test]
fn connection_timeout_is_clamped() {
    let mut config = Config::default();
    config.connection_timeout = 1;
    assert_eq!(config.connection_timeout(), Duration::from_secs(5));
    config.connection_timeout = 10_000;
    assert_eq!(config.connection_timeout(), Duration::from_secs(300));
    config.connection_timeout = 60;
    assert_eq!(config.connection_timeout(), Duration::from_secs(60));
}

#[test]
fn transport_fields_changed_detects_recycle_worthy_edits() {
    let base = {
        let mut u = UpstreamConfig::new("fs", TransportKind::Stdio, StartupMode::Active);
        u.command = Some("mcp-fs".to_string());
        u
    };

    let mut same_mode = base.clone();
    same_mode.startup_mode = StartupMode::Disabled;
    assert!(!base.transport_fields_changed(&same_mode));

    let mut new_command = base.clone();
    new_command.command = Some("mcp-fs-v2".to_string());
    assert!(base.transport_fields_changed(&new_command));

    let mut new_env = base.clone();
    new_env.env.insert("PATH".to_string(), "/bin".to_string());
    assert!(base.transport_fields_changed(&new_env));

    let mut new_threshold = base.clone();
    new_threshold.failure_threshold = Some(3);
    assert!(!base.transport_fields_changed(&new_threshold));
}

#[test]
fn effective_failure_threshold_defaults() {
    let mut u = UpstreamConfig::new("x", TransportKind::Http, StartupMode::Active);
    assert_eq!(u.effective_failure_threshold(), DEFAULT_FAILURE_THRESHOLD);
    u.failure_threshold = Some(3);
    assert_eq!(u.effective_failure_threshold(), 3);
}

#[test]
fn group_members_filters_by_group() {
    let mut config = Config::default();
    for (name, group) in [("a", Some(7)), ("b", Some(7)), ("c", Some(2)), ("d", None)] {
        let mut u = UpstreamConfig::new(name, TransportKind::Http, StartupMode::Active);
        u.url = Some("http://localhost:9000".to_string());
        u.group = group;
        config.mcp_servers.push(u);
    }

    let members: Vec<&str> = config.group_members(7).map(|u| u.name.as_str()).collect();
    assert_eq!(members, vec!["a", "b"]);
}

#[test]
fn config_roundtrips_through_json() {
    let mut config = Config::default();
    let mut u = UpstreamConfig::new("gh", TransportKind::StreamableHttp, StartupMode::Active);
    u.url = Some("https://example.com/mcp".to_string());
    u.headers.insert("X-Tenant".to_string(), "dev".to_string());
    u.group = Some(1);
    config.mcp_servers.push(u);
    config.groups.push(GroupConfig { id: 1, name: "dev".to_string() });

    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
