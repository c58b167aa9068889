// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mcpproxy_core::{EventKind, FakeClock};
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_config(dir: &Path, servers: serde_json::Value) -> PathBuf {
    let path = dir.join("mcp_config.json");
    let body = json!({ "mcpServers": servers });
    std::fs::write(&path, serde_json::to_string_pretty(&body).unwrap()).unwrap();
    path
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: Arc<ConfigStore<FakeClock>>,
    store: Arc<Store>,
    bus: EventBus,
    coordinator: Arc<StatePersistenceCoordinator<FakeClock>>,
    config_path: PathBuf,
}

fn fixture(servers: serde_json::Value) -> Fixture {
    let dir = tempdir().unwrap();
    let config_path = write_config(dir.path(), servers);
    let bus = EventBus::new();
    let clock = FakeClock::new();
    let config = Arc::new(ConfigStore::load(&config_path, bus.clone(), clock.clone()).unwrap());
    let store = Arc::new(Store::open(&dir.path().join("store.db")).unwrap());
    let coordinator = StatePersistenceCoordinator::new(
        Arc::clone(&config),
        Arc::clone(&store),
        bus.clone(),
        clock,
    );
    Fixture {
        _dir: dir,
        config,
        store,
        bus,
        coordinator,
        config_path,
    }
}

fn on_disk_mode(path: &Path, server: &str) -> String {
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    raw["mcpServers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == server)
        .unwrap()["startup_mode"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn auto_disable_writes_both_stores_and_announces() {
    let f = fixture(json!([
        {"name": "demo", "protocol": "http", "url": "http://localhost:1", "startup_mode": "active"}
    ]));
    let mut config_events = f.bus.subscribe_filtered([EventKind::ServerConfigChanged]);
    let mut disable_events = f.bus.subscribe_filtered([EventKind::ServerAutoDisabled]);

    f.coordinator
        .set_mode(
            &ServerName::new("demo"),
            StartupMode::AutoDisabled,
            Some("threshold exceeded".to_string()),
        )
        .unwrap();

    // Both stores agree.
    assert_eq!(on_disk_mode(&f.config_path, "demo"), "auto_disabled");
    let snapshot = f.config.snapshot();
    let upstream = snapshot.upstream("demo").unwrap();
    assert_eq!(upstream.startup_mode, StartupMode::AutoDisabled);
    assert_eq!(upstream.auto_disable_reason.as_deref(), Some("threshold exceeded"));
    assert_eq!(upstream.last_user_mode, Some(StartupMode::Active));

    let record = f.store.upstream_record("demo").unwrap();
    assert_eq!(record.server_state, "auto_disabled");
    assert_eq!(record.auto_disable_reason.as_deref(), Some("threshold exceeded"));

    // Both event kinds fired.
    assert!(config_events.try_recv().is_some());
    match disable_events.try_recv().unwrap() {
        Event::ServerAutoDisabled { server, reason, .. } => {
            assert_eq!(server, "demo");
            assert_eq!(reason, "threshold exceeded");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn failed_config_write_rolls_back_kv() {
    let f = fixture(json!([
        {"name": "demo", "protocol": "http", "url": "http://localhost:1", "startup_mode": "active"}
    ]));

    // Seed a KV record, then target an upstream the config does not know:
    // the config mutation fails after the KV write.
    let seeded = UpstreamRecord {
        server_state: "error".to_string(),
        consecutive_failures: 2,
        ..Default::default()
    };
    f.store.put_upstream_record("ghost", &seeded).unwrap();

    let err = f
        .coordinator
        .set_mode(&ServerName::new("ghost"), StartupMode::AutoDisabled, Some("x".to_string()))
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    // The KV write was rolled back to the seeded value.
    assert_eq!(f.store.upstream_record("ghost").unwrap(), seeded);

    // And a record that never existed is removed again on rollback.
    let err = f
        .coordinator
        .set_mode(&ServerName::new("phantom"), StartupMode::Disabled, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert!(f.store.upstream_record("phantom").is_none());
}

#[test]
fn clear_auto_disable_restores_last_user_mode() {
    let f = fixture(json!([
        {"name": "demo", "protocol": "http", "url": "http://localhost:1", "startup_mode": "lazy_loading"}
    ]));

    f.coordinator
        .set_mode(&ServerName::new("demo"), StartupMode::AutoDisabled, Some("threshold exceeded".to_string()))
        .unwrap();
    assert_eq!(
        f.config.snapshot().upstream("demo").unwrap().last_user_mode,
        Some(StartupMode::LazyLoading)
    );

    let restored = f.coordinator.clear_auto_disable(&ServerName::new("demo")).unwrap();
    assert_eq!(restored, StartupMode::LazyLoading);

    let snapshot = f.config.snapshot();
    let upstream = snapshot.upstream("demo").unwrap();
    assert_eq!(upstream.startup_mode, StartupMode::LazyLoading);
    assert!(upstream.auto_disable_reason.is_none());
    assert!(upstream.last_user_mode.is_none());

    let record = f.store.upstream_record("demo").unwrap();
    assert_eq!(record.consecutive_failures, 0);
    assert!(record.auto_disable_reason.is_none());
}

#[test]
fn group_mode_touches_every_member_in_one_write() {
    let f = fixture(json!([
        {"name": "a", "protocol": "http", "url": "http://localhost:1", "startup_mode": "auto_disabled", "group": 7},
        {"name": "b", "protocol": "http", "url": "http://localhost:2", "startup_mode": "auto_disabled", "group": 7},
        {"name": "c", "protocol": "http", "url": "http://localhost:3", "startup_mode": "active", "group": 2}
    ]));
    let mut group_events = f.bus.subscribe_filtered([EventKind::ServerGroupUpdated]);

    let members = f
        .coordinator
        .set_group_mode(7, StartupMode::Active)
        .unwrap();
    assert_eq!(members.len(), 2);

    for name in ["a", "b"] {
        assert_eq!(on_disk_mode(&f.config_path, name), "active");
        let record = f.store.upstream_record(name).unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.auto_disable_reason.is_none());
    }
    // Non-members are untouched.
    assert_eq!(on_disk_mode(&f.config_path, "c"), "active");

    let mut announced = Vec::new();
    while let Some(event) = group_events.try_recv() {
        if let Event::ServerGroupUpdated { server, group, .. } = event {
            assert_eq!(group, Some(7));
            announced.push(server.as_str().to_string());
        }
    }
    announced.sort();
    assert_eq!(announced, vec!["a", "b"]);
}

#[test]
fn group_mode_with_no_members_is_a_noop() {
    let f = fixture(json!([]));
    assert!(f.coordinator.set_group_mode(9, StartupMode::Active).unwrap().is_empty());
}

#[test]
fn repair_rewrites_diverged_records() {
    let f = fixture(json!([
        {"name": "demo", "protocol": "http", "url": "http://localhost:1", "startup_mode": "disabled"},
        {"name": "live", "protocol": "http", "url": "http://localhost:2", "startup_mode": "active"}
    ]));

    // demo's shadow claims it was ready; live's shadow claims it is
    // auto-disabled. Both disagree with the config.
    f.store
        .put_upstream_record(
            "demo",
            &UpstreamRecord {
                server_state: "ready".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    f.store
        .put_upstream_record(
            "live",
            &UpstreamRecord {
                server_state: "auto_disabled".to_string(),
                auto_disable_reason: Some("stale".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    // And a record for an upstream that no longer exists.
    f.store
        .put_upstream_record("gone", &UpstreamRecord::default())
        .unwrap();

    repair_divergence(&f.config.snapshot(), &f.store);

    assert_eq!(f.store.upstream_record("demo").unwrap().server_state, "disabled");
    let live = f.store.upstream_record("live").unwrap();
    assert_eq!(live.server_state, "not_started");
    assert!(live.auto_disable_reason.is_none());
    assert!(f.store.upstream_record("gone").is_none());
}
