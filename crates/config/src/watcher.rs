// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS file watch on the config path.
//!
//! External edits reload the store and surface per-upstream changes to the
//! manager; self-writes are filtered by the store's suppression window.
//! The parent directory is watched because atomic saves replace the file
//! inode via rename.

use crate::{ConfigError, ConfigStore, UpstreamChange};
use mcpproxy_core::Clock;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Editors often fire several events per save; coalesce them.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Running watch on one config file. Dropping it stops the watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching the store's path. Non-empty change sets from external
    /// edits are forwarded to `changes_tx`.
    pub fn spawn<C: Clock>(
        store: Arc<ConfigStore<C>>,
        changes_tx: mpsc::Sender<Vec<UpstreamChange>>,
    ) -> Result<Self, ConfigError> {
        let (fs_tx, mut fs_rx) = mpsc::channel::<()>(1);
        let file_name = store.path().file_name().map(|n| n.to_os_string());

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        // Full channel means a reload is already pending.
                        let _ = fs_tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "config watcher error"),
            })?;

        let dir = store
            .path()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            while fs_rx.recv().await.is_some() {
                tokio::time::sleep(DEBOUNCE).await;
                while fs_rx.try_recv().is_ok() {}

                match store.reload_external() {
                    Ok(changes) if !changes.is_empty() => {
                        if changes_tx.send(changes).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "config reload failed, keeping previous snapshot"),
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}
