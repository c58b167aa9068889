// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon logging: rotated main log, per-upstream stderr files (written by
//! the stdio transports), and the auto-disable audit log.

use crate::DaemonError;
use chrono::{DateTime, Utc};
use mcpproxy_core::{Clock, Event, EventBus, EventKind};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum daemon log size before startup rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// One line per auto-disable event lands here.
pub const FAILED_SERVERS_LOG: &str = "failed_servers.log";

/// Rotate the daemon log if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `mcpproxyd.log` → `.1` → `.2` → `.3`, deleting the oldest.
/// Best-effort: rotation failures never block startup.
pub fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Non-blocking file logging with an env-overridable level filter.
pub fn setup_logging(
    log_path: &Path,
    level: &str,
) -> Result<tracing_appender::non_blocking::WorkerGuard, DaemonError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let dir = log_path.parent().ok_or(DaemonError::NoDataDir)?;
    let file_name = log_path.file_name().ok_or(DaemonError::NoDataDir)?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

/// Append one audit line per `server_auto_disabled` event to
/// `failed_servers.log` until the bus closes.
pub fn spawn_failed_servers_log<C: Clock>(bus: &EventBus, log_dir: PathBuf, clock: C) {
    let mut events = bus.subscribe_filtered([EventKind::ServerAutoDisabled]);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Event::ServerAutoDisabled { server, reason, .. } = &event else {
                continue;
            };
            let stamp = DateTime::<Utc>::from_timestamp_millis(clock.epoch_ms() as i64)
                .unwrap_or_default()
                .to_rfc3339();
            let line = format!("{stamp} {server} {reason}\n");
            let path = log_dir.join(FAILED_SERVERS_LOG);
            let result = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(line.as_bytes()));
            if let Err(e) = result {
                warn!(error = %e, "failed to append to failed_servers.log");
            }
        }
    });
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
