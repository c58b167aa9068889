// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream manager: owns the set of managed clients.
//!
//! Reconciles the client map against config snapshots (create on added,
//! destroy on removed, mutate or recycle on edited), routes tool calls,
//! applies user and group operations through the persistence coordinator,
//! and feeds the aggregate state broadcaster. External surfaces hold only
//! the upstream name and re-resolve through here on every use.

use crate::app_state::AppStateTracker;
use crate::coordinator::StatePersistenceCoordinator;
use mcpproxy_config::{ConfigStore, UpstreamConfig};
use mcpproxy_core::{Clock, EventKind, RuntimeState, ServerName, StartupMode};
use mcpproxy_engine::{ClientDeps, ClientStatus, EngineError, ManagedClient};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct ClientHandle<C: Clock> {
    client: Arc<ManagedClient<C>>,
    task: JoinHandle<()>,
    /// Last config applied to the client, for change detection.
    config: UpstreamConfig,
}

pub struct UpstreamManager<C: Clock> {
    deps: ClientDeps<C>,
    coordinator: Arc<StatePersistenceCoordinator<C>>,
    config: Arc<ConfigStore<C>>,
    clients: Mutex<HashMap<ServerName, ClientHandle<C>>>,
    cancel: CancellationToken,
    call_timeout: Duration,
}

impl<C: Clock> UpstreamManager<C> {
    pub fn new(
        deps: ClientDeps<C>,
        coordinator: Arc<StatePersistenceCoordinator<C>>,
        config: Arc<ConfigStore<C>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let call_timeout = config.snapshot().connection_timeout();
        Arc::new(Self {
            deps,
            coordinator,
            config,
            clients: Mutex::new(HashMap::new()),
            cancel,
            call_timeout,
        })
    }

    /// Diff the current client set against the config snapshot.
    pub fn reconcile(&self) {
        let snapshot = self.config.snapshot();
        let mut clients = self.clients.lock();

        let stale: Vec<ServerName> = clients
            .keys()
            .filter(|name| snapshot.upstream(name.as_str()).is_none())
            .cloned()
            .collect();
        for name in stale {
            if let Some(handle) = clients.remove(&name) {
                info!(server = %name, "upstream removed from config, destroying client");
                handle.client.cancel_token().cancel();
                // The runtime shadow goes with the upstream.
                if let Err(e) = self.deps.store.delete_upstream(name.as_str()) {
                    warn!(server = %name, error = %e, "failed to delete upstream records");
                }
            }
        }

        for upstream in &snapshot.mcp_servers {
            match clients.get_mut(&upstream.name) {
                None => {
                    info!(server = %upstream.name, mode = %upstream.startup_mode, "creating managed client");
                    let client =
                        ManagedClient::new(upstream.clone(), self.deps.clone(), &self.cancel);
                    let task = tokio::spawn(Arc::clone(&client).run());
                    clients.insert(
                        upstream.name.clone(),
                        ClientHandle {
                            client,
                            task,
                            config: upstream.clone(),
                        },
                    );
                }
                Some(handle) => {
                    if handle.config != *upstream {
                        handle.client.update_config(upstream.clone());
                        handle.config = upstream.clone();
                    }
                }
            }
        }
    }

    pub fn get_client(&self, name: &str) -> Option<Arc<ManagedClient<C>>> {
        self.clients.lock().get(name).map(|h| Arc::clone(&h.client))
    }

    /// Status of every client, name-ordered.
    pub fn list_clients(&self) -> Vec<ClientStatus> {
        let mut statuses: Vec<ClientStatus> = self
            .clients
            .lock()
            .values()
            .map(|h| h.client.status())
            .collect();
        statuses.sort_by(|a, b| a.server.cmp(&b.server));
        statuses
    }

    fn client_states(&self) -> Vec<RuntimeState> {
        self.clients
            .lock()
            .values()
            .map(|h| h.client.state())
            .collect()
    }

    /// Route one tool invocation to the owning upstream.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> Result<Value, EngineError> {
        let client = self
            .get_client(server)
            .ok_or_else(|| EngineError::NotAvailable(ServerName::new(server)))?;
        client.call_tool(tool, args, self.call_timeout).await
    }

    /// Set one upstream to `active` (enable) or `disabled`. Enabling also
    /// clears auto-disable state and failure counters.
    pub fn enable_server(&self, name: &ServerName, enable: bool) -> Result<(), EngineError> {
        let mode = if enable {
            StartupMode::Active
        } else {
            StartupMode::Disabled
        };
        self.coordinator.set_mode(name, mode, None)?;
        if enable {
            if let Some(client) = self.get_client(name.as_str()) {
                client.on_auto_disable_cleared(mode);
            }
        }
        self.reconcile();
        Ok(())
    }

    /// Apply enable/disable to every member of a group. Enabling clears
    /// auto-disable for all members atomically from the user's view.
    pub fn group_enable(&self, group: u64, enable: bool) -> Result<Vec<ServerName>, EngineError> {
        let mode = if enable {
            StartupMode::Active
        } else {
            StartupMode::Disabled
        };
        let members = self.coordinator.set_group_mode(group, mode)?;
        if enable {
            for name in &members {
                if let Some(client) = self.get_client(name.as_str()) {
                    client.on_auto_disable_cleared(mode);
                }
            }
        }
        self.reconcile();
        Ok(members)
    }

    /// Security hold on or off.
    pub fn quarantine(&self, name: &ServerName, on: bool) -> Result<(), EngineError> {
        let mode = if on {
            StartupMode::Quarantined
        } else {
            StartupMode::Active
        };
        self.coordinator.set_mode(name, mode, None)?;
        if !on {
            if let Some(client) = self.get_client(name.as_str()) {
                client.on_auto_disable_cleared(mode);
            }
        }
        self.reconcile();
        Ok(())
    }

    /// User clearance of an auto-disable: restores the pre-disable mode.
    pub fn clear_auto_disable(&self, name: &ServerName) -> Result<StartupMode, EngineError> {
        let restored = self.coordinator.clear_auto_disable(name)?;
        if let Some(client) = self.get_client(name.as_str()) {
            client.on_auto_disable_cleared(restored);
        }
        self.reconcile();
        Ok(restored)
    }

    /// Per-session stop; not persisted.
    pub fn stop_instance(&self, name: &ServerName) -> Result<(), EngineError> {
        self.get_client(name.as_str())
            .ok_or_else(|| EngineError::NotAvailable(name.clone()))?
            .stop_instance();
        Ok(())
    }

    pub fn start_instance(&self, name: &ServerName) -> Result<(), EngineError> {
        self.get_client(name.as_str())
            .ok_or_else(|| EngineError::NotAvailable(name.clone()))?
            .start_instance();
        Ok(())
    }

    /// Aggregate state broadcaster: recompute the application state on
    /// every per-upstream state change.
    pub fn spawn_app_state_observer(self: Arc<Self>, tracker: Arc<AppStateTracker<C>>) {
        let mut events = self
            .deps
            .bus
            .subscribe_filtered([EventKind::ServerStateChanged]);
        let cancel = self.cancel.clone();
        let manager = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => {
                        if event.is_none() {
                            break;
                        }
                        tracker.observe(&manager.client_states());
                    }
                }
            }
        });
    }

    /// Snapshot used by the observer and by startup.
    pub fn observe_states(&self, tracker: &AppStateTracker<C>) {
        tracker.observe(&self.client_states());
    }

    /// Cancel every client and wait for their actors, bounded by `grace`
    /// per task; stragglers are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut clients = self.clients.lock();
            clients.drain().map(|(_, handle)| handle.task).collect()
        };
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("client actor ignored shutdown grace, aborting");
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
