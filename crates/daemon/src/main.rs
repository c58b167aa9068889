// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mcpproxyd: the MCP aggregating proxy daemon.
//!
//! Process shell around the lifecycle core: loads and watches the config,
//! opens the persistent store, reaps orphaned containers, reconciles the
//! managed clients, and runs until SIGINT/SIGTERM. SIGHUP reloads the
//! config in place.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use fs2::FileExt;
use mcpproxy_config::{cleanup_backups, ConfigStore, ConfigWatcher};
use mcpproxy_core::{EventBus, SystemClock};
use mcpproxy_daemon::coordinator::repair_divergence;
use mcpproxy_daemon::{
    exit_codes, logging, reaper, AppStateTracker, DaemonError, DaemonTransportFactory,
    StatePersistenceCoordinator, UpstreamManager,
};
use mcpproxy_engine::{AdmissionGate, BackoffPolicy, ClientDeps, ModePersistence};
use mcpproxy_storage::Store;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Grace period for client teardown at shutdown. Covers the stdio
/// SIGTERM-to-SIGKILL escalation with headroom.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Periodic housekeeping cadence (store compaction, backup cleanup).
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Backup sidecars kept per config file.
const BACKUPS_KEPT: usize = 5;

const USAGE: &str = "Usage: mcpproxyd [--config <path>] [--help | --version]";

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    // Flags are handled before any lock or store is touched.
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("mcpproxyd {}", env!("CARGO_PKG_VERSION"));
                return exit_codes::OK;
            }
            "--help" | "-h" | "help" => {
                println!("mcpproxyd {}", env!("CARGO_PKG_VERSION"));
                println!("MCP aggregating proxy daemon");
                println!();
                println!("{USAGE}");
                println!();
                println!("OPTIONS:");
                println!("    --config <path>  Config file (default: ~/.mcpproxy/mcp_config.json)");
                println!("    -h, --help       Print help information");
                println!("    -V, --version    Print version information");
                return exit_codes::OK;
            }
            "--config" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config requires a path");
                    eprintln!("{USAGE}");
                    return exit_codes::CONFIG;
                }
            },
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("{USAGE}");
                return exit_codes::CONFIG;
            }
        }
    }

    let Some(config_path) = config_path.or_else(default_config_path) else {
        eprintln!("error: cannot determine config path, pass --config");
        return exit_codes::CONFIG;
    };

    let bus = EventBus::new();
    let clock = SystemClock;

    // Configuration errors at startup are exit code 2.
    let config_store = match ConfigStore::load(&config_path, bus.clone(), clock.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("configuration error: {e}");
            return exit_codes::CONFIG;
        }
    };
    let snapshot = config_store.snapshot();

    let Some(data_dir) = snapshot
        .data_dir
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".mcpproxy")))
    else {
        eprintln!("error: cannot determine data directory");
        return exit_codes::FATAL;
    };
    let log_dir = data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("error: cannot create {}: {e}", log_dir.display());
        return exit_codes::FATAL;
    }

    let log_path = log_dir.join("mcpproxyd.log");
    logging::rotate_log_if_needed(&log_path);
    let _log_guard = match logging::setup_logging(&log_path, &snapshot.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: cannot set up logging: {e}");
            return exit_codes::FATAL;
        }
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "starting mcpproxyd"
    );

    let _lock_file = match acquire_lock(&data_dir) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("mcpproxyd is already running? ({e})");
            error!(error = %e, "failed to acquire daemon lock");
            return exit_codes::FATAL;
        }
    };

    // Persistent-store corruption is exit code 3.
    let store = match Store::open(&data_dir.join("store.db")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let code = DaemonError::from(e).exit_code();
            eprintln!("persistent store error");
            error!("failed to open persistent store");
            return code;
        }
    };

    // The config file is the source of truth for intent; the KV shadow
    // follows it on load.
    repair_divergence(&snapshot, &store);

    // Kill containers stranded by a previous crash.
    reaper::reap_orphans(&data_dir).await;

    let root_cancel = CancellationToken::new();
    let coordinator =
        StatePersistenceCoordinator::new(Arc::clone(&config_store), Arc::clone(&store), bus.clone(), clock.clone());
    let factory = DaemonTransportFactory::new(
        Arc::clone(&config_store),
        Arc::clone(&store),
        log_dir.clone(),
        data_dir.clone(),
    );
    let deps = ClientDeps {
        bus: bus.clone(),
        clock: clock.clone(),
        store: Arc::clone(&store),
        gate: Arc::new(AdmissionGate::new(snapshot.admission_capacity())),
        modes: Arc::clone(&coordinator) as Arc<dyn ModePersistence>,
        transports: factory,
        connection_timeout: snapshot.connection_timeout(),
        backoff: BackoffPolicy::default(),
    };
    let manager = UpstreamManager::new(
        deps,
        Arc::clone(&coordinator),
        Arc::clone(&config_store),
        root_cancel.child_token(),
    );
    let tracker = AppStateTracker::new(bus.clone(), clock.clone());
    Arc::clone(&manager).spawn_app_state_observer(Arc::clone(&tracker));
    logging::spawn_failed_servers_log(&bus, log_dir.clone(), clock.clone());

    manager.reconcile();
    // A config with zero upstreams is Running immediately.
    manager.observe_states(&tracker);

    let (changes_tx, mut changes_rx) = mpsc::channel(8);
    let _watcher = match ConfigWatcher::spawn(Arc::clone(&config_store), changes_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "config watcher unavailable, external edits need SIGHUP");
            None
        }
    };
    let mut watcher_alive = _watcher.is_some();

    spawn_housekeeping(Arc::clone(&store), config_path.clone(), root_cancel.child_token());

    let (mut sigterm, mut sigint, mut sighup) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(t), Ok(i), Ok(h)) => (t, i, h),
        _ => {
            error!("failed to install signal handlers");
            return exit_codes::FATAL;
        }
    };

    info!(servers = snapshot.mcp_servers.len(), "daemon ready");
    println!("READY");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading config");
                match config_store.reload_external() {
                    Ok(changes) if !changes.is_empty() => manager.reconcile(),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "config reload failed, keeping previous snapshot"),
                }
            }
            changes = changes_rx.recv(), if watcher_alive => {
                match changes {
                    Some(_) => manager.reconcile(),
                    None => {
                        warn!("config watcher channel closed");
                        watcher_alive = false;
                    }
                }
            }
        }
    }

    tracker.begin_stopping();
    manager.shutdown(SHUTDOWN_GRACE).await;
    root_cancel.cancel();
    tracker.finish_stopped();

    let _ = std::fs::remove_file(data_dir.join("mcpproxyd.pid"));
    info!("daemon stopped");
    exit_codes::OK
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mcpproxy").join("mcp_config.json"))
}

/// Exclusive lock + pid file so two daemons never share a data dir.
fn acquire_lock(data_dir: &std::path::Path) -> Result<File, std::io::Error> {
    let path = data_dir.join("mcpproxyd.pid");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    file.try_lock_exclusive()?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

/// Periodic sweep: store compaction past 10 MB, old config backups pruned.
fn spawn_housekeeping(store: Arc<Store>, config_path: PathBuf, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        interval.tick().await; // first tick is immediate; skip it
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match store.compact_if_needed() {
                        Ok(true) => info!("persistent store compacted"),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "store compaction failed"),
                    }
                    if let Err(e) = cleanup_backups(&config_path, BACKUPS_KEPT) {
                        warn!(error = %e, "backup cleanup failed");
                    }
                }
            }
        }
    });
}
