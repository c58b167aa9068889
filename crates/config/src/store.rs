// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The config store: load, snapshot, mutate, atomic save.
//!
//! All writes funnel through [`ConfigStore::mutate`], which validates the
//! candidate, writes it via `*.tmp` + rename, and only then swaps the
//! in-memory snapshot. A failed write rolls back to the pre-mutate
//! snapshot before the error propagates, so readers never observe a config
//! that is not on disk. The first mutation of a session also drops a
//! timestamped backup sidecar next to the file.

use crate::{migrate_value, validate, Config, ConfigError, UpstreamConfig};
use chrono::{DateTime, Utc};
use mcpproxy_core::{Clock, Event, EventBus, ServerName, StartupMode};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long self-writes suppress the file watcher.
pub const WATCH_SUPPRESS_WINDOW: Duration = Duration::from_secs(2);

/// One semantically-altered upstream between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamChange {
    pub server: ServerName,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Added {
        mode: StartupMode,
    },
    Removed {
        mode: StartupMode,
    },
    Modified {
        old_mode: StartupMode,
        new_mode: StartupMode,
        /// A transport-defining field changed; the connection must be
        /// recycled rather than mutated in place.
        transport_changed: bool,
    },
}

struct StoreInner {
    snapshot: Arc<Config>,
    /// One backup sidecar per session, before the first mutation.
    backed_up: bool,
    suppress_until: Option<Instant>,
}

/// Durable, observable holder of the configuration file.
pub struct ConfigStore<C: Clock> {
    path: PathBuf,
    bus: EventBus,
    clock: C,
    inner: Mutex<StoreInner>,
}

impl<C: Clock> ConfigStore<C> {
    /// Load and validate the config at `path`, running the legacy migration
    /// first. A migrated file is rewritten once, with a backup sidecar.
    pub fn load(path: impl Into<PathBuf>, bus: EventBus, clock: C) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = fs::read_to_string(&path)?;
        let mut value: Value = serde_json::from_str(&raw)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }

        let migrated = migrate_value(&mut value);
        let config: Config = serde_json::from_value(value)?;
        validate(&config)?;

        let store = Self {
            path,
            bus,
            clock,
            inner: Mutex::new(StoreInner {
                snapshot: Arc::new(config),
                backed_up: false,
                suppress_until: None,
            }),
        };

        if migrated {
            info!(path = %store.path.display(), "migrated legacy config fields to startup_mode");
            let mut inner = store.inner.lock();
            let snapshot = Arc::clone(&inner.snapshot);
            store.save_locked(&mut inner, &snapshot)?;
        }

        Ok(store)
    }

    /// Immutable copy of the current configuration.
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.inner.lock().snapshot)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a deep copy of the config, validate, persist, and
    /// publish `server_config_changed` for each upstream whose fields
    /// changed. On any failure the in-memory snapshot is untouched.
    pub fn mutate(
        &self,
        f: impl FnOnce(&mut Config) -> Result<(), ConfigError>,
    ) -> Result<Vec<UpstreamChange>, ConfigError> {
        let changes = {
            let mut inner = self.inner.lock();
            let old = Arc::clone(&inner.snapshot);
            let mut next = (*old).clone();
            f(&mut next)?;
            validate(&next)?;

            let changes = diff(&old, &next);
            if !changes.is_empty() || *old != next {
                self.save_locked(&mut inner, &next)?;
                inner.snapshot = Arc::new(next);
            }
            changes
        };

        self.publish_changes(&changes);
        Ok(changes)
    }

    /// Suppress watcher-driven reloads for `d` from now.
    pub fn set_suppress_watcher(&self, d: Duration) {
        self.inner.lock().suppress_until = Some(self.clock.now() + d);
    }

    /// True while self-write suppression is in effect.
    pub fn watcher_suppressed(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.suppress_until, Some(until) if self.clock.now() < until)
    }

    /// Reload after an external edit. Returns the per-upstream changes, or
    /// an empty list when the watcher is suppressed or nothing changed.
    /// A file that fails to parse or validate leaves the previous snapshot
    /// in effect.
    pub fn reload_external(&self) -> Result<Vec<UpstreamChange>, ConfigError> {
        if self.watcher_suppressed() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path)?;
        let mut value: Value = serde_json::from_str(&raw)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        // Migrate in memory only; external editors keep their file as-is
        // until the next self-write.
        migrate_value(&mut value);
        let config: Config = serde_json::from_value(value)?;
        validate(&config)?;

        let changes = {
            let mut inner = self.inner.lock();
            let changes = diff(&inner.snapshot, &config);
            if !changes.is_empty() || *inner.snapshot != config {
                inner.snapshot = Arc::new(config);
            }
            changes
        };

        self.publish_changes(&changes);
        Ok(changes)
    }

    fn publish_changes(&self, changes: &[UpstreamChange]) {
        let ts_ms = self.clock.epoch_ms();
        for change in changes {
            let (old_state, new_state, data) = match &change.kind {
                ChangeKind::Added { mode } => (None, Some(mode.to_string()), Value::Null),
                ChangeKind::Removed { mode } => (Some(mode.to_string()), None, Value::Null),
                ChangeKind::Modified {
                    old_mode,
                    new_mode,
                    transport_changed,
                } => (
                    Some(old_mode.to_string()),
                    Some(new_mode.to_string()),
                    serde_json::json!({ "transport_changed": transport_changed }),
                ),
            };
            self.bus.publish(Event::ServerConfigChanged {
                server: change.server.clone(),
                old_state,
                new_state,
                ts_ms,
                data,
            });
        }
    }

    /// Atomic write: sibling `*.tmp` then rename, with a one-per-session
    /// backup before the first write. Also arms the watcher suppression
    /// window so our own write does not bounce back as an external edit.
    fn save_locked(&self, inner: &mut StoreInner, config: &Config) -> Result<(), ConfigError> {
        if !inner.backed_up && self.path.exists() {
            let backup = self.backup_path();
            if let Err(e) = fs::copy(&self.path, &backup) {
                warn!(error = %e, backup = %backup.display(), "failed to write config backup");
            } else {
                info!(backup = %backup.display(), "config backup created");
            }
            inner.backed_up = true;
        }

        let tmp = self.path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(config)?;
        fs::write(&tmp, &body)?;
        let file = fs::File::open(&tmp)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;

        inner.suppress_until = Some(self.clock.now() + WATCH_SUPPRESS_WINDOW);
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = DateTime::<Utc>::from_timestamp_millis(self.clock.epoch_ms() as i64)
            .unwrap_or_default()
            .format("%Y%m%d-%H%M%S");
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.json".to_string());
        self.path
            .with_file_name(format!("{file_name}.backup-{stamp}"))
    }
}

/// Per-upstream semantic diff between two configs.
fn diff(old: &Config, new: &Config) -> Vec<UpstreamChange> {
    let mut changes = Vec::new();

    for prev in &old.mcp_servers {
        match new.upstream(prev.name.as_str()) {
            None => changes.push(UpstreamChange {
                server: prev.name.clone(),
                kind: ChangeKind::Removed {
                    mode: prev.startup_mode,
                },
            }),
            Some(next) if prev != next => changes.push(UpstreamChange {
                server: prev.name.clone(),
                kind: ChangeKind::Modified {
                    old_mode: prev.startup_mode,
                    new_mode: next.startup_mode,
                    transport_changed: prev.transport_fields_changed(next),
                },
            }),
            Some(_) => {}
        }
    }

    for next in &new.mcp_servers {
        if old.upstream(next.name.as_str()).is_none() {
            changes.push(UpstreamChange {
                server: next.name.clone(),
                kind: ChangeKind::Added {
                    mode: next.startup_mode,
                },
            });
        }
    }

    changes
}

/// Housekeeping: keep only the newest `keep` backup sidecars of `path`.
pub fn cleanup_backups(path: &Path, keep: usize) -> std::io::Result<usize> {
    let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(0);
    };
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(0);
    };
    let prefix = format!("{file_name}.backup-");

    let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    // Timestamped names sort chronologically.
    backups.sort();

    let mut removed = 0;
    while backups.len() > keep {
        let oldest = backups.remove(0);
        if fs::remove_file(&oldest).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Convenience for call sites that mutate one upstream in place.
pub fn mutate_upstream(
    config: &mut Config,
    name: &str,
    f: impl FnOnce(&mut UpstreamConfig),
) -> Result<(), ConfigError> {
    match config.upstream_mut(name) {
        Some(upstream) => {
            f(upstream);
            Ok(())
        }
        None => Err(ConfigError::Rejected(format!("unknown upstream: {name}"))),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
