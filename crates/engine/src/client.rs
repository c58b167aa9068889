// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The managed client: one actor task per upstream.
//!
//! Owns the state machine, the transport slot, and the retry policy. The
//! actor parks in stable states (disabled family, Sleeping, Stopped) until
//! woken, and otherwise drives the connect cycle: admission slot, open,
//! initialize, discover, ready, serve until disconnect. Failures back off
//! exponentially; the consecutive-failure threshold and the restart-loop
//! tripwire both route durable demotion through [`ModePersistence`], whose
//! rollback contract keeps the client retrying if persistence fails.

use crate::admission::AdmissionGate;
use crate::backoff::BackoffPolicy;
use crate::machine::StateMachine;
use crate::restart::{RestartTracker, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_COOLDOWN, DEFAULT_RESTART_WINDOW};
use crate::{EngineError, REASON_RESTART_LOOP, REASON_THRESHOLD};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcpproxy_config::UpstreamConfig;
use mcpproxy_core::{tool_list_hash, Clock, Event, EventBus, RuntimeState, ServerName, StartupMode};
use mcpproxy_storage::Store;
use mcpproxy_transport::{ErrorKind, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The only path that persists startup-mode changes. Implemented by the
/// state persistence coordinator; the client never writes the config file.
#[async_trait]
pub trait ModePersistence: Send + Sync {
    async fn set_startup_mode(
        &self,
        server: &ServerName,
        mode: StartupMode,
        reason: Option<String>,
    ) -> Result<(), EngineError>;
}

/// Builds a fresh transport per connection attempt.
pub trait TransportFactory: Send + Sync {
    fn build(&self, upstream: &UpstreamConfig) -> Result<Box<dyn Transport>, TransportError>;
}

/// Shared dependencies handed to every client.
#[derive(Clone)]
pub struct ClientDeps<C: Clock> {
    pub bus: EventBus,
    pub clock: C,
    pub store: Arc<Store>,
    pub gate: Arc<AdmissionGate>,
    pub modes: Arc<dyn ModePersistence>,
    pub transports: Arc<dyn TransportFactory>,
    /// Applies to every connect attempt, retries included.
    pub connection_timeout: Duration,
    pub backoff: BackoffPolicy,
}

/// Reporting snapshot of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub server: ServerName,
    pub state: RuntimeState,
    pub startup_mode: StartupMode,
    pub consecutive_failures: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub first_attempt_ms: Option<u64>,
    pub last_retry_ms: Option<u64>,
    pub connected_at_ms: Option<u64>,
    pub last_success_ms: Option<u64>,
    pub connection_duration_ms: Option<u64>,
    pub tool_count: usize,
    pub group: Option<u64>,
}

pub struct ManagedClient<C: Clock> {
    server: ServerName,
    deps: ClientDeps<C>,
    machine: StateMachine<C>,
    config: Mutex<UpstreamConfig>,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    restart: Mutex<RestartTracker>,
    wake: Notify,
    cancel: CancellationToken,
    stopped: AtomicBool,
    connect_requested: AtomicBool,
    recycle_requested: AtomicBool,
    tool_count: AtomicUsize,
}

impl<C: Clock> ManagedClient<C> {
    pub fn new(
        upstream: UpstreamConfig,
        deps: ClientDeps<C>,
        parent_cancel: &CancellationToken,
    ) -> Arc<Self> {
        let record = deps
            .store
            .upstream_record(upstream.name.as_str())
            .unwrap_or_default();
        let machine = StateMachine::new(
            upstream.name.clone(),
            deps.bus.clone(),
            deps.clock.clone(),
            record.consecutive_failures,
        );
        let restarts = RestartTracker::new(
            upstream.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
            DEFAULT_RESTART_WINDOW,
            DEFAULT_RESTART_COOLDOWN,
        );
        Arc::new(Self {
            server: upstream.name.clone(),
            machine,
            config: Mutex::new(upstream),
            transport: tokio::sync::Mutex::new(None),
            restart: Mutex::new(restarts),
            wake: Notify::new(),
            cancel: parent_cancel.child_token(),
            stopped: AtomicBool::new(false),
            connect_requested: AtomicBool::new(false),
            recycle_requested: AtomicBool::new(false),
            tool_count: AtomicUsize::new(record.tool_count),
            deps,
        })
    }

    pub fn server(&self) -> &ServerName {
        &self.server
    }

    pub fn state(&self) -> RuntimeState {
        self.machine.state()
    }

    pub fn startup_mode(&self) -> StartupMode {
        self.config.lock().startup_mode
    }

    pub fn tool_count(&self) -> usize {
        self.tool_count.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> ClientStatus {
        let machine = self.machine.status();
        let config = self.config.lock();
        let connection_duration_ms = machine
            .connected_at_ms
            .map(|at| self.deps.clock.epoch_ms().saturating_sub(at));
        ClientStatus {
            server: self.server.clone(),
            state: machine.state,
            startup_mode: config.startup_mode,
            consecutive_failures: machine.consecutive_failures,
            retry_count: machine.retry_count,
            last_error: machine.last_error,
            first_attempt_ms: machine.first_attempt_ms,
            last_retry_ms: machine.last_retry_ms,
            connected_at_ms: machine.connected_at_ms,
            last_success_ms: machine.last_success_ms,
            connection_duration_ms,
            tool_count: self.tool_count.load(Ordering::SeqCst),
            group: config.group,
        }
    }

    /// Swap in an edited upstream config. Transport-defining changes
    /// recycle the connection; everything else mutates in place.
    pub fn update_config(&self, new: UpstreamConfig) {
        let transport_changed = {
            let mut config = self.config.lock();
            let changed = config.transport_fields_changed(&new);
            *config = new;
            changed
        };
        if transport_changed {
            self.recycle_requested.store(true, Ordering::SeqCst);
        }
        self.wake.notify_one();
    }

    /// Per-session stop; does not persist.
    pub fn stop_instance(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn start_instance(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Called after the coordinator cleared auto-disable: zero the counters
    /// and send the actor back into the connect loop.
    pub fn on_auto_disable_cleared(&self, new_mode: StartupMode) {
        self.machine.reset_failures();
        self.restart.lock().reset();
        {
            let mut config = self.config.lock();
            config.startup_mode = new_mode;
            config.auto_disable_reason = None;
        }
        self.stopped.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// The lifecycle actor. Runs until the cancellation token fires.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.stopped.load(Ordering::SeqCst) {
                self.park(RuntimeState::Stopped, true);
                self.wait_for_wake().await;
                continue;
            }
            let mode = self.config.lock().startup_mode;
            match mode {
                StartupMode::Disabled | StartupMode::Quarantined | StartupMode::AutoDisabled => {
                    if let Some(state) = RuntimeState::mirror(mode) {
                        self.park(state, true);
                    }
                    self.wait_for_wake().await;
                }
                StartupMode::LazyLoading if !self.connect_requested.load(Ordering::SeqCst) => {
                    self.park(RuntimeState::Sleeping, true);
                    self.wait_for_wake().await;
                }
                StartupMode::Active | StartupMode::LazyLoading => {
                    self.connect_loop().await;
                }
            }
        }
        self.teardown_transport().await;
        // Disabled-family states keep their mirror through shutdown.
        if RuntimeState::mirror(self.config.lock().startup_mode).is_none() {
            // No record write here: a client torn down because its upstream
            // was removed must not resurrect the deleted row.
            self.park(RuntimeState::Stopped, false);
        }
        debug!(server = %self.server, "client actor finished");
    }

    /// Route a tool call. Sleeping upstreams connect on demand; the
    /// disabled family fails with not-available.
    pub async fn call_tool(
        &self,
        tool: &str,
        args: Value,
        call_timeout: Duration,
    ) -> Result<Value, EngineError> {
        let state = self.machine.state();
        if self.stopped.load(Ordering::SeqCst) || matches!(
            state,
            RuntimeState::Disabled
                | RuntimeState::Quarantined
                | RuntimeState::AutoDisabled
                | RuntimeState::Stopped
        ) {
            return Err(EngineError::NotAvailable(self.server.clone()));
        }

        if state != RuntimeState::Ready {
            self.connect_requested.store(true, Ordering::SeqCst);
            self.wake.notify_one();
            self.wait_until_ready().await?;
        }

        let mut guard = self.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or_else(|| EngineError::NotAvailable(self.server.clone()))?;

        match tokio::time::timeout(call_timeout, transport.call_tool(tool, args)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                // A per-call protocol error leaves the connection alone;
                // connection-level failures demote Ready so the actor
                // reconnects.
                if !matches!(e.kind(), ErrorKind::Protocol) {
                    drop(guard);
                    let _ = self
                        .machine
                        .fail(e.to_string(), e.counts_toward_auto_disable());
                    self.wake.notify_one();
                }
                Err(e.into())
            }
            Err(_) => {
                drop(guard);
                let timeout_err = TransportError::Timeout(call_timeout);
                let _ = self.machine.fail(timeout_err.to_string(), true);
                self.wake.notify_one();
                Err(timeout_err.into())
            }
        }
    }

    fn should_leave_connect(&self) -> bool {
        self.cancel.is_cancelled()
            || self.stopped.load(Ordering::SeqCst)
            || !matches!(
                self.config.lock().startup_mode,
                StartupMode::Active | StartupMode::LazyLoading
            )
    }

    async fn connect_loop(&self) {
        let mut attempt: u32 = 0;
        loop {
            if self.should_leave_connect() {
                return;
            }

            // Cooldown left over from a tripped restart loop whose
            // persistence failed.
            let blocked = self.restart.lock().blocked_remaining(self.deps.clock.now());
            if let Some(remaining) = blocked {
                debug!(server = %self.server, ?remaining, "restart loop cooldown");
                if !self.sleep_interruptible(remaining).await {
                    return;
                }
                continue;
            }

            // Connecting covers both the admission wait and the dial.
            if !self.ensure_startable() {
                return;
            }
            if self.machine.transition(RuntimeState::Connecting).is_err() {
                warn!(server = %self.server, state = %self.machine.state(), "cannot enter connect cycle");
                return;
            }

            let slot = match self.deps.gate.acquire(&self.server, &self.cancel).await {
                Ok(slot) => slot,
                Err(_) => return,
            };

            // Transport (re)creation. The tripwire fires regardless of the
            // failure threshold.
            if self.restart.lock().record_restart(self.deps.clock.now()) {
                drop(slot);
                let _ = self.machine.fail(REASON_RESTART_LOOP, false);
                self.auto_disable(REASON_RESTART_LOOP).await;
                return;
            }

            let connected = self.attempt_connect().await;
            drop(slot);
            // Let the queue advance before any re-acquisition.
            tokio::task::yield_now().await;

            match connected {
                Ok(transport) => {
                    attempt = 0;
                    // Populate the slot before announcing Ready so an
                    // on-demand caller never sees Ready with no transport.
                    let mut closed = transport.closed();
                    *self.transport.lock().await = Some(transport);
                    let _ = self.machine.transition(RuntimeState::Ready);
                    self.serve(&mut closed).await;
                    self.persist_runtime_state();
                    if self.should_leave_connect() {
                        return;
                    }
                    if self.config.lock().startup_mode == StartupMode::LazyLoading
                        && self.machine.state() != RuntimeState::Ready
                    {
                        // Lazy upstreams fall back to the cache after a
                        // disconnect instead of holding a retry loop.
                        self.connect_requested.store(false, Ordering::SeqCst);
                        return;
                    }
                    if self.machine.state() == RuntimeState::Ready {
                        // Left serve() for a recycle with the state intact.
                        let _ = self.machine.fail("transport recycled", false);
                    }
                    if !self.sleep_interruptible(self.deps.backoff.delay(0)).await {
                        return;
                    }
                }
                Err(e) => {
                    if !e.counts_toward_auto_disable() {
                        // Auth problems neither count nor feed the tripwire.
                        self.restart.lock().forgive();
                    }
                    self.persist_runtime_state();
                    if e.counts_toward_auto_disable() {
                        let threshold = self.config.lock().effective_failure_threshold();
                        if self.machine.consecutive_failures() >= threshold {
                            self.auto_disable(REASON_THRESHOLD).await;
                            if self.config.lock().startup_mode == StartupMode::AutoDisabled {
                                return;
                            }
                            // Persistence failed: rollback contract says
                            // stay in Error and keep the retry cycle going.
                        }
                    }
                    let delay = self.deps.backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    if !self.sleep_interruptible(delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// One full connect attempt: build, open, initialize, discover.
    /// On success the machine is Ready and the tool cache is refreshed.
    async fn attempt_connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let config = self.config.lock().clone();
        let limit = self.deps.connection_timeout;

        let result: Result<(Box<dyn Transport>, Vec<mcpproxy_core::ToolDescriptor>), TransportError> =
            async {
                let mut transport = self.deps.transports.build(&config)?;
                phase(limit, transport.open()).await?;
                if config.oauth.is_some() {
                    let _ = self.machine.transition(RuntimeState::Authenticating);
                }
                phase(limit, transport.initialize()).await?;
                let _ = self.machine.transition(RuntimeState::Discovering);
                let tools = phase(limit, transport.list_tools()).await?;
                Ok((transport, tools))
            }
            .await;

        match result {
            Ok((transport, tools)) => {
                self.record_discovery(&tools);
                Ok(transport)
            }
            Err(e) => {
                if e.is_auth() && self.machine.state() == RuntimeState::Connecting {
                    // Surface the auth exchange before the error state.
                    let _ = self.machine.transition(RuntimeState::Authenticating);
                }
                let _ = self
                    .machine
                    .fail(e.to_string(), e.counts_toward_auto_disable());
                Err(e)
            }
        }
    }

    /// Persist the refreshed tool cache and runtime record, and announce
    /// the new tool list. Cache failures are logged, never fatal to the
    /// connection.
    fn record_discovery(&self, tools: &[mcpproxy_core::ToolDescriptor]) {
        let name = self.server.as_str();
        let hash = tool_list_hash(tools);
        let now = utc_from_ms(self.deps.clock.epoch_ms());

        if let Err(e) = self
            .deps
            .store
            .replace_tool_metadata(name, tools, &hash, now)
        {
            warn!(server = name, error = %e, "failed to cache tool metadata");
        }

        let mut record = self.deps.store.upstream_record(name).unwrap_or_default();
        record.server_state = RuntimeState::Ready.as_str().to_string();
        record.ever_connected = true;
        record.last_successful_connection = Some(now);
        record.tool_count = tools.len();
        record.consecutive_failures = 0;
        record.auto_disable_reason = None;
        if let Err(e) = self.deps.store.put_upstream_record(name, &record) {
            warn!(server = name, error = %e, "failed to update upstream record");
        }

        self.tool_count.store(tools.len(), Ordering::SeqCst);
        self.deps.bus.publish(Event::ToolsUpdated {
            server: self.server.clone(),
            tool_count: tools.len(),
            hash,
            ts_ms: self.deps.clock.epoch_ms(),
        });
    }

    /// Hold the connection until it drops or something asks us to leave.
    async fn serve(&self, closed: &mut mcpproxy_transport::ClosedSignal) {
        let mut state_rx = self.machine.watch();

        while self.machine.state() == RuntimeState::Ready {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = closed.wait() => {
                    let _ = self.machine.fail("connection closed by downstream", true);
                    break;
                }
                _ = self.wake.notified() => {
                    if self.stopped.load(Ordering::SeqCst) || self.should_leave_connect() {
                        break;
                    }
                    if self.recycle_requested.swap(false, Ordering::SeqCst) {
                        info!(server = %self.server, "transport-defining config changed, recycling");
                        break;
                    }
                }
                changed = state_rx.changed() => {
                    // A call failure may have demoted us to Error.
                    if changed.is_err() || *state_rx.borrow() != RuntimeState::Ready {
                        break;
                    }
                }
            }
        }

        self.teardown_transport().await;
    }

    async fn teardown_transport(&self) {
        let mut guard = self.transport.lock().await;
        if let Some(mut transport) = guard.take() {
            transport.close().await;
        }
    }

    async fn auto_disable(&self, reason: &str) {
        info!(server = %self.server, reason, "auto-disabling upstream");
        match self
            .deps
            .modes
            .set_startup_mode(&self.server, StartupMode::AutoDisabled, Some(reason.to_string()))
            .await
        {
            Ok(()) => {
                {
                    let mut config = self.config.lock();
                    config.startup_mode = StartupMode::AutoDisabled;
                    config.auto_disable_reason = Some(reason.to_string());
                }
                let _ = self.machine.transition(RuntimeState::AutoDisabled);
            }
            Err(e) => {
                // Rollback contract: the mode write failed, so the state
                // stays Error and the next retry cycle proceeds.
                warn!(server = %self.server, error = %e, "failed to persist auto-disable");
            }
        }
    }

    /// Mirror the machine's failure bookkeeping into the runtime record so
    /// restarts resume the counter.
    fn persist_runtime_state(&self) {
        let name = self.server.as_str();
        let mut record = self.deps.store.upstream_record(name).unwrap_or_default();
        record.server_state = self.machine.state().as_str().to_string();
        record.consecutive_failures = self.machine.consecutive_failures();
        if let Err(e) = self.deps.store.put_upstream_record(name, &record) {
            warn!(server = name, error = %e, "failed to persist runtime state");
        }
    }

    /// Leave a parked stable state through NotStarted before connecting.
    fn ensure_startable(&self) -> bool {
        let state = self.machine.state();
        if matches!(
            state,
            RuntimeState::Disabled
                | RuntimeState::Quarantined
                | RuntimeState::AutoDisabled
                | RuntimeState::Stopped
        ) {
            return self.machine.transition(RuntimeState::NotStarted).is_ok();
        }
        true
    }

    /// Settle into a stable state, hopping through Stopped/NotStarted when
    /// the direct edge is not in the transition table.
    fn park(&self, to: RuntimeState, persist: bool) {
        if self.machine.state() == to {
            return;
        }
        let parked = self.machine.transition(to).is_ok()
            || (self.machine.state().can_transition(RuntimeState::NotStarted)
                && self.machine.transition(RuntimeState::NotStarted).is_ok()
                && self.machine.transition(to).is_ok())
            || (self.machine.transition(RuntimeState::Stopped).is_ok()
                && self.machine.transition(RuntimeState::NotStarted).is_ok()
                && self.machine.transition(to).is_ok());
        if parked {
            if persist {
                // Keep the runtime shadow in step with the settled state.
                self.persist_runtime_state();
            }
        } else {
            debug!(server = %self.server, from = %self.machine.state(), to = %to, "no transition path, leaving state");
        }
    }

    async fn wait_for_wake(&self) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Cancellable sleep. Returns false when the client should exit the
    /// connect loop (cancelled, stopped, or mode changed).
    async fn sleep_interruptible(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.should_leave_connect(),
            _ = self.wake.notified() => !self.should_leave_connect(),
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn wait_until_ready(&self) -> Result<(), EngineError> {
        let mut rx = self.machine.watch();
        let deadline = self.deps.connection_timeout + Duration::from_secs(5);

        let wait = async {
            loop {
                match *rx.borrow() {
                    RuntimeState::Ready => return Ok(()),
                    RuntimeState::Error
                    | RuntimeState::Disabled
                    | RuntimeState::Quarantined
                    | RuntimeState::AutoDisabled
                    | RuntimeState::Stopped => {
                        return Err(EngineError::NotAvailable(self.server.clone()))
                    }
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(EngineError::NotAvailable(self.server.clone()));
                }
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::WaitTimeout("upstream ready".to_string())),
        }
    }
}

async fn phase<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit)),
    }
}

fn utc_from_ms(ms: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or_default()
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
