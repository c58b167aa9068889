// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State persistence coordinator: the only writer of `startup_mode`.
//!
//! Durable mode changes touch two stores. The protocol writes the KV
//! record first (capturing the old value), then the config file through
//! its atomic save; if the config write fails the KV write is re-issued
//! with the old value and the original error propagates, so the pair
//! never splits brain. Managed clients request transitions here and never
//! touch the config file themselves.

use async_trait::async_trait;
use mcpproxy_config::{mutate_upstream, ConfigStore};
use mcpproxy_core::{Clock, Event, EventBus, RuntimeState, ServerName, StartupMode};
use mcpproxy_engine::{EngineError, ModePersistence};
use mcpproxy_storage::{Store, UpstreamRecord};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StatePersistenceCoordinator<C: Clock> {
    config: Arc<ConfigStore<C>>,
    store: Arc<Store>,
    bus: EventBus,
    clock: C,
}

impl<C: Clock> StatePersistenceCoordinator<C> {
    pub fn new(config: Arc<ConfigStore<C>>, store: Arc<Store>, bus: EventBus, clock: C) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            bus,
            clock,
        })
    }

    /// Persist one upstream's startup mode across both stores.
    pub fn set_mode(
        &self,
        server: &ServerName,
        mode: StartupMode,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let name = server.as_str();

        // Step 1: KV first, capturing the old record for rollback.
        let old_record = self.store.upstream_record(name);
        let mut record = old_record.clone().unwrap_or_default();
        record.server_state = RuntimeState::mirror(mode)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| RuntimeState::NotStarted.as_str().to_string());
        record.auto_disable_reason = reason.clone();
        if !mode.is_disabled_family() {
            record.consecutive_failures = 0;
        }
        self.store.put_upstream_record(name, &record)?;

        // Step 2: config file through the atomic save.
        let config_result = self.config.mutate(|config| {
            mutate_upstream(config, name, |upstream| {
                if mode == StartupMode::AutoDisabled
                    && upstream.startup_mode != StartupMode::AutoDisabled
                {
                    upstream.last_user_mode = Some(upstream.startup_mode);
                }
                upstream.startup_mode = mode;
                upstream.auto_disable_reason = reason.clone();
                if !mode.is_disabled_family() {
                    upstream.last_user_mode = None;
                }
            })
        });

        // Step 3: roll the KV record back if the config write failed.
        if let Err(e) = config_result {
            let rollback = match &old_record {
                Some(old) => self.store.put_upstream_record(name, old),
                None => self.store.delete(mcpproxy_storage::collections::UPSTREAMS, name),
            };
            if let Err(rollback_err) = rollback {
                // Both writes failed; the store is the fatal surface here.
                warn!(server = name, error = %rollback_err, "KV rollback failed after config write failure");
                return Err(rollback_err.into());
            }
            return Err(e.into());
        }

        // Step 4: the config store already published server_config_changed;
        // auto-disables additionally announce themselves.
        if mode == StartupMode::AutoDisabled {
            if let Some(reason) = reason {
                info!(server = name, reason, "upstream auto-disabled");
                self.bus.publish(Event::ServerAutoDisabled {
                    server: server.clone(),
                    reason,
                    ts_ms: self.clock.epoch_ms(),
                });
            }
        }
        Ok(())
    }

    /// Reverse of auto-disable: restore the last user-chosen mode, reset
    /// the failure counter, clear the reason. Returns the restored mode so
    /// the manager can send the client back into its connect loop.
    pub fn clear_auto_disable(&self, server: &ServerName) -> Result<StartupMode, EngineError> {
        let restored = self
            .config
            .snapshot()
            .upstream(server.as_str())
            .and_then(|u| u.last_user_mode)
            .unwrap_or(StartupMode::Active);
        self.set_mode(server, restored, None)?;
        Ok(restored)
    }

    /// Apply enable/disable semantics to every member of a group in one
    /// config mutation, so the operation is atomic from the user's view.
    /// Enabling clears auto-disable for each member.
    pub fn set_group_mode(
        &self,
        group: u64,
        mode: StartupMode,
    ) -> Result<Vec<ServerName>, EngineError> {
        let members: Vec<ServerName> = self
            .config
            .snapshot()
            .group_members(group)
            .map(|u| u.name.clone())
            .collect();
        if members.is_empty() {
            return Ok(members);
        }

        // Step 1: batch the KV writes, capturing the old rows.
        let old_records: Vec<(ServerName, Option<UpstreamRecord>)> = members
            .iter()
            .map(|name| (name.clone(), self.store.upstream_record(name.as_str())))
            .collect();
        self.store.tx(|tx| {
            for (name, old) in &old_records {
                let mut record = old.clone().unwrap_or_default();
                record.server_state = RuntimeState::mirror(mode)
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| RuntimeState::NotStarted.as_str().to_string());
                record.auto_disable_reason = None;
                if !mode.is_disabled_family() {
                    record.consecutive_failures = 0;
                }
                tx.put(
                    mcpproxy_storage::collections::UPSTREAMS,
                    name.as_str(),
                    serde_json::to_value(&record)?,
                );
            }
            Ok(())
        })?;

        // Step 2: one config mutation covering the whole group.
        let config_result = self.config.mutate(|config| {
            for upstream in &mut config.mcp_servers {
                if upstream.group == Some(group) {
                    upstream.startup_mode = mode;
                    upstream.auto_disable_reason = None;
                    if !mode.is_disabled_family() {
                        upstream.last_user_mode = None;
                    }
                }
            }
            Ok(())
        });

        if let Err(e) = config_result {
            // Step 3: restore every member's old row.
            let rollback = self.store.tx(|tx| {
                for (name, old) in &old_records {
                    match old {
                        Some(record) => tx.put(
                            mcpproxy_storage::collections::UPSTREAMS,
                            name.as_str(),
                            serde_json::to_value(record)?,
                        ),
                        None => tx.delete(mcpproxy_storage::collections::UPSTREAMS, name.as_str()),
                    }
                }
                Ok(())
            });
            if let Err(rollback_err) = rollback {
                warn!(group, error = %rollback_err, "KV rollback failed after group config write failure");
                return Err(rollback_err.into());
            }
            return Err(e.into());
        }

        let ts_ms = self.clock.epoch_ms();
        for name in &members {
            self.bus.publish(Event::ServerGroupUpdated {
                server: name.clone(),
                group: Some(group),
                ts_ms,
            });
        }
        Ok(members)
    }
}

/// Startup repair: the config file is the source of truth for intent, so
/// any KV row that disagrees with it is rewritten (and rows for upstreams
/// no longer configured are dropped).
pub fn repair_divergence(config: &mcpproxy_config::Config, store: &Store) {
    for (name, _) in store.list(mcpproxy_storage::collections::UPSTREAMS) {
        if config.upstream(&name).is_none() {
            info!(server = %name, "dropping stale upstream record");
            if let Err(e) = store.delete_upstream(&name) {
                warn!(server = %name, error = %e, "failed to drop stale record");
            }
        }
    }

    for upstream in &config.mcp_servers {
        let name = upstream.name.as_str();
        let Some(mut record) = store.upstream_record(name) else {
            continue;
        };
        let expected = RuntimeState::mirror(upstream.startup_mode).map(|s| s.as_str().to_string());
        let mut dirty = false;

        match &expected {
            Some(state) if record.server_state != *state => {
                record.server_state = state.clone();
                dirty = true;
            }
            None => {
                // Connectable mode: a lingering disabled-family state in
                // the shadow is a divergence.
                let parked = matches!(
                    record.server_state.as_str(),
                    "disabled" | "quarantined" | "auto_disabled"
                );
                if parked {
                    record.server_state = RuntimeState::NotStarted.as_str().to_string();
                    dirty = true;
                }
                if record.auto_disable_reason.is_some() {
                    record.auto_disable_reason = None;
                    dirty = true;
                }
            }
            Some(_) => {}
        }

        if upstream.startup_mode == StartupMode::AutoDisabled
            && record.auto_disable_reason.is_none()
        {
            record.auto_disable_reason = upstream.auto_disable_reason.clone();
            dirty = record.auto_disable_reason.is_some() || dirty;
        }

        if dirty {
            info!(server = name, "repairing KV record to follow config");
            if let Err(e) = store.put_upstream_record(name, &record) {
                warn!(server = name, error = %e, "failed to repair record");
            }
        }
    }
}

#[async_trait]
impl<C: Clock> ModePersistence for StatePersistenceCoordinator<C> {
    async fn set_startup_mode(
        &self,
        server: &ServerName,
        mode: StartupMode,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        self.set_mode(server, mode, reason)
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
