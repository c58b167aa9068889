// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphaned container cleanup.
//!
//! Isolated stdio children leave `mcpproxy-cid-*` files next to the data
//! dir. A crash can strand the containers those files name; the startup
//! sweep force-removes them and deletes the files. The file is removed
//! even when docker fails, because a missing container is the common case.

use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Prefix of container-id files written by isolated stdio transports.
pub const CID_FILE_PREFIX: &str = "mcpproxy-cid-";

const DOCKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Force-remove one container. Returns true only when docker confirmed
/// the removal; a container that is already gone, an unreachable docker
/// daemon, and a hung invocation all report false after logging.
async fn remove_container(container_id: &str) -> bool {
    let mut cmd = Command::new("docker");
    cmd.args(["rm", "-f", container_id]).kill_on_drop(true);

    match tokio::time::timeout(DOCKER_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => true,
        // Non-zero exit: the container no longer exists, which is what we
        // wanted anyway.
        Ok(Ok(_)) => false,
        Ok(Err(e)) => {
            warn!(container = %container_id, error = %e, "docker unavailable while reaping");
            false
        }
        Err(_) => {
            warn!(
                container = %container_id,
                timeout_secs = DOCKER_TIMEOUT.as_secs(),
                "docker rm hung, abandoning container"
            );
            false
        }
    }
}

/// Scan `data_dir` for container-id files and reap what they name.
/// Returns the number of files cleaned up.
pub async fn reap_orphans(data_dir: &Path) -> usize {
    let entries = match std::fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %data_dir.display(), error = %e, "cannot scan for orphaned containers");
            return 0;
        }
    };

    let mut reaped = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !name.starts_with(CID_FILE_PREFIX) {
            continue;
        }

        let path = entry.path();
        let container_id = std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        if !container_id.is_empty() && remove_container(&container_id).await {
            info!(container = %container_id, "reaped orphaned container");
        }

        if let Err(e) = std::fs::remove_file(&path) {
            warn!(file = %path.display(), error = %e, "failed to remove cid file");
        } else {
            reaped += 1;
        }
    }

    if reaped > 0 {
        info!(count = reaped, "cleaned up orphaned container-id files");
    }
    reaped
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
