// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Production transport factory.
//!
//! Resolves the ambient inputs a transport needs at build time: the
//! current global config (timeout, docker defaults), the per-server log
//! directory, and a bearer token if the OAuth collaborator has minted one.

use mcpproxy_config::{ConfigStore, UpstreamConfig};
use mcpproxy_core::Clock;
use mcpproxy_engine::TransportFactory;
use mcpproxy_storage::Store;
use mcpproxy_transport::{build_transport, Transport, TransportCtx, TransportError};
use std::path::PathBuf;
use std::sync::Arc;

pub struct DaemonTransportFactory<C: Clock> {
    config: Arc<ConfigStore<C>>,
    store: Arc<Store>,
    log_dir: PathBuf,
    data_dir: PathBuf,
}

impl<C: Clock> DaemonTransportFactory<C> {
    pub fn new(
        config: Arc<ConfigStore<C>>,
        store: Arc<Store>,
        log_dir: PathBuf,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            log_dir,
            data_dir,
        })
    }
}

impl<C: Clock> TransportFactory for DaemonTransportFactory<C> {
    fn build(&self, upstream: &UpstreamConfig) -> Result<Box<dyn Transport>, TransportError> {
        let config = self.config.snapshot();
        let bearer_token = self
            .store
            .oauth_token(upstream.name.as_str())
            .map(|t| t.access_token);
        let ctx = TransportCtx {
            log_dir: self.log_dir.clone(),
            data_dir: self.data_dir.clone(),
            timeout: config.connection_timeout(),
            bearer_token,
        };
        build_transport(upstream, &config, &ctx)
    }
}
