// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::admission::AdmissionGate;
use crate::testing::{fake_tools, FakeFactory, FakeModes, FakeOutcome};
use mcpproxy_config::{TransportKind, UpstreamConfig};
use mcpproxy_core::{EventKind, FakeClock};
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: Arc<Store>,
    bus: EventBus,
    factory: Arc<FakeFactory>,
    modes: Arc<FakeModes>,
    cancel: CancellationToken,
}

fn harness(factory: Arc<FakeFactory>) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("store.db")).unwrap());
    Harness {
        _dir: dir,
        store,
        bus: EventBus::new(),
        factory,
        modes: FakeModes::new(),
        cancel: CancellationToken::new(),
    }
}

fn deps(h: &Harness) -> ClientDeps<FakeClock> {
    ClientDeps {
        bus: h.bus.clone(),
        clock: FakeClock::new(),
        store: Arc::clone(&h.store),
        gate: Arc::new(AdmissionGate::new(5)),
        modes: h.modes.clone() as Arc<dyn ModePersistence>,
        transports: h.factory.clone() as Arc<dyn TransportFactory>,
        connection_timeout: Duration::from_secs(2),
        backoff: BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            jitter: 0.0,
        },
    }
}

fn upstream(mode: StartupMode) -> UpstreamConfig {
    let mut u = UpstreamConfig::new("fs", TransportKind::Stdio, mode);
    u.command = Some("mcp-fs".to_string());
    u
}

async fn wait_for_state<C: Clock>(client: &ManagedClient<C>, state: RuntimeState, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if client.state() == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {state}, still {}",
            client.state()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn active_upstream_connects_and_caches_tools() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    let h = harness(Arc::clone(&factory));
    let mut events = h
        .bus
        .subscribe_filtered([EventKind::ServerStateChanged, EventKind::ToolsUpdated]);

    let client = ManagedClient::new(upstream(StartupMode::Active), deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());

    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;

    // Tool cache and record landed in the store.
    assert_eq!(h.store.tool_metadata("fs").len(), 2);
    let record = h.store.upstream_record("fs").unwrap();
    assert!(record.ever_connected);
    assert_eq!(record.tool_count, 2);
    assert_eq!(record.consecutive_failures, 0);
    assert_eq!(client.tool_count(), 2);

    // The state sequence walked the connect cycle.
    let mut transitions = Vec::new();
    let mut tool_updates = 0;
    while let Some(event) = events.try_recv() {
        match event {
            Event::ServerStateChanged { new_state, .. } => transitions.push(new_state),
            Event::ToolsUpdated { tool_count, .. } => {
                tool_updates += 1;
                assert_eq!(tool_count, 2);
            }
            _ => {}
        }
    }
    assert_eq!(transitions, vec!["connecting", "discovering", "ready"]);
    assert_eq!(tool_updates, 1);

    h.cancel.cancel();
}

#[tokio::test]
async fn lazy_upstream_sleeps_with_cached_tools_and_connects_on_call() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    let h = harness(Arc::clone(&factory));

    // Pre-seed the cache as if a prior session discovered 11 tools.
    let record = mcpproxy_storage::UpstreamRecord {
        tool_count: 11,
        ever_connected: true,
        ..Default::default()
    };
    h.store.put_upstream_record("fs", &record).unwrap();

    let client = ManagedClient::new(upstream(StartupMode::LazyLoading), deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());

    wait_for_state(&client, RuntimeState::Sleeping, Duration::from_millis(500)).await;
    assert_eq!(factory.built(), 0, "sleeping upstream must not spawn anything");
    assert_eq!(client.tool_count(), 11);

    // First call triggers the on-demand connect.
    let result = client
        .call_tool("read", json!({"path": "/tmp"}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result["echo"], "read");
    assert_eq!(client.state(), RuntimeState::Ready);
    assert_eq!(factory.built(), 1);

    // Second call reuses the open transport.
    client
        .call_tool("write", json!({}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(factory.built(), 1, "no further transitions on a warm transport");

    h.cancel.cancel();
}

#[tokio::test]
async fn threshold_failures_auto_disable_with_reason() {
    let factory = FakeFactory::new(FakeOutcome::OpenFails);
    let h = harness(Arc::clone(&factory));

    let mut up = upstream(StartupMode::Active);
    up.failure_threshold = Some(3);
    // Keep the tripwire out of the way so the threshold path is what fires.
    up.max_restarts = Some(10);

    let client = ManagedClient::new(up, deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());

    wait_for_state(&client, RuntimeState::AutoDisabled, Duration::from_secs(5)).await;

    let calls = h.modes.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, StartupMode::AutoDisabled);
    assert_eq!(calls[0].2.as_deref(), Some(REASON_THRESHOLD));

    // The persisted record kept the failure count.
    let record = h.store.upstream_record("fs").unwrap();
    assert_eq!(record.consecutive_failures, 3);

    // No further connect attempts while parked.
    let built = factory.built();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(factory.built(), built);

    h.cancel.cancel();
}

#[tokio::test]
async fn restart_loop_trips_before_threshold() {
    // Connects fine, then drops almost immediately, over and over.
    let factory = FakeFactory::new(FakeOutcome::ReadyThenClose(Duration::from_millis(20)));
    let h = harness(Arc::clone(&factory));

    let mut up = upstream(StartupMode::Active);
    up.failure_threshold = Some(100);

    let client = ManagedClient::new(up, deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());

    wait_for_state(&client, RuntimeState::AutoDisabled, Duration::from_secs(5)).await;

    let calls = h.modes.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].2.as_deref(), Some(REASON_RESTART_LOOP));
    // Tripwire fired on the 4th transport creation, before it was built.
    assert_eq!(factory.built(), 3);

    h.cancel.cancel();
}

#[tokio::test]
async fn failed_mode_persistence_keeps_retrying() {
    let factory = FakeFactory::new(FakeOutcome::OpenFails);
    let h = harness(Arc::clone(&factory));
    h.modes.fail.store(true, Ordering::SeqCst);

    let mut up = upstream(StartupMode::Active);
    up.failure_threshold = Some(1);
    up.max_restarts = Some(100);

    let client = ManagedClient::new(up, deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());

    // The rollback contract keeps the client in the retry cycle.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(client.state(), RuntimeState::AutoDisabled);
    assert!(factory.built() >= 2, "retries must continue after failed persistence");

    h.cancel.cancel();
}

#[tokio::test]
async fn disabled_family_never_connects() {
    for mode in [StartupMode::Disabled, StartupMode::Quarantined, StartupMode::AutoDisabled] {
        let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
        let h = harness(Arc::clone(&factory));

        let client = ManagedClient::new(upstream(mode), deps(&h), &h.cancel);
        tokio::spawn(Arc::clone(&client).run());

        let expected = RuntimeState::mirror(mode).unwrap();
        wait_for_state(&client, expected, Duration::from_millis(500)).await;
        assert_eq!(factory.built(), 0);

        let err = client
            .call_tool("read", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAvailable(_)));

        h.cancel.cancel();
    }
}

#[tokio::test]
async fn stop_and_start_instance_cycle() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    let h = harness(Arc::clone(&factory));

    let client = ManagedClient::new(upstream(StartupMode::Active), deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;

    client.stop_instance();
    wait_for_state(&client, RuntimeState::Stopped, Duration::from_secs(2)).await;
    let err = client
        .call_tool("read", json!({}), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAvailable(_)));

    client.start_instance();
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;
    assert_eq!(factory.built(), 2);

    h.cancel.cancel();
}

#[tokio::test]
async fn transport_defining_edit_recycles_connection() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    let h = harness(Arc::clone(&factory));

    let client = ManagedClient::new(upstream(StartupMode::Active), deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;
    assert_eq!(factory.built(), 1);

    let mut edited = upstream(StartupMode::Active);
    edited.command = Some("mcp-fs-v2".to_string());
    client.update_config(edited);

    // Recycle: the old transport closes and a fresh one is built.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while factory.built() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "expected a rebuilt transport");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;

    h.cancel.cancel();
}

#[tokio::test]
async fn mode_edit_to_disabled_parks_without_recycle() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    let h = harness(Arc::clone(&factory));

    let client = ManagedClient::new(upstream(StartupMode::Active), deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;

    let mut edited = upstream(StartupMode::Active);
    edited.startup_mode = StartupMode::Disabled;
    client.update_config(edited);

    wait_for_state(&client, RuntimeState::Disabled, Duration::from_secs(2)).await;
    assert_eq!(factory.built(), 1, "disable must not rebuild the transport");

    h.cancel.cancel();
}

#[tokio::test]
async fn clearing_auto_disable_reenters_connect_loop() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    factory.push("fs", FakeOutcome::OpenFails);
    let h = harness(Arc::clone(&factory));

    let mut up = upstream(StartupMode::Active);
    up.failure_threshold = Some(1);
    up.max_restarts = Some(100);

    let client = ManagedClient::new(up, deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());
    wait_for_state(&client, RuntimeState::AutoDisabled, Duration::from_secs(5)).await;

    client.on_auto_disable_cleared(StartupMode::Active);
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;
    assert_eq!(client.status().consecutive_failures, 0);

    h.cancel.cancel();
}

#[tokio::test]
async fn auth_errors_surface_authenticating_and_do_not_count() {
    let factory = FakeFactory::new(FakeOutcome::AuthRequired);
    let h = harness(Arc::clone(&factory));
    let mut events = h.bus.subscribe_filtered([EventKind::ServerStateChanged]);

    let mut up = upstream(StartupMode::Active);
    up.failure_threshold = Some(1);

    let client = ManagedClient::new(up, deps(&h), &h.cancel);
    tokio::spawn(Arc::clone(&client).run());

    wait_for_state(&client, RuntimeState::Error, Duration::from_secs(5)).await;
    assert_eq!(client.status().consecutive_failures, 0, "auth must not count");
    assert_ne!(client.state(), RuntimeState::AutoDisabled);

    // Auth attempts are forgiven by the restart tracker too: even after
    // many cycles the client is still retrying, not auto-disabled.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(client.state(), RuntimeState::AutoDisabled);
    assert!(h.modes.calls().is_empty());

    let mut saw_authenticating = false;
    while let Some(event) = events.try_recv() {
        if let Event::ServerStateChanged { new_state, .. } = event {
            if new_state == "authenticating" {
                saw_authenticating = true;
            }
        }
    }
    assert!(saw_authenticating, "auth-required must surface the Authenticating state");

    h.cancel.cancel();
}

#[tokio::test]
async fn cancellation_stops_the_actor() {
    let factory = FakeFactory::new(FakeOutcome::Healthy(fake_tools()));
    let h = harness(Arc::clone(&factory));

    let client = ManagedClient::new(upstream(StartupMode::Active), deps(&h), &h.cancel);
    let handle = tokio::spawn(Arc::clone(&client).run());
    wait_for_state(&client, RuntimeState::Ready, Duration::from_secs(5)).await;

    h.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(6), handle)
        .await
        .expect("actor must exit after cancellation")
        .unwrap();
    assert_eq!(client.state(), RuntimeState::Stopped);
}
