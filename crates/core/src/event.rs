// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types published on the bus.
//!
//! Serializes with `{"type": "event_name", ...fields}` format. This is the
//! schema external surfaces (tray, dashboard, long-poll endpoints) consume;
//! field names are part of the contract.

use crate::ServerName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn is_null(v: &Value) -> bool {
    v.is_null()
}

/// Events emitted by the lifecycle core.
///
/// Every event carries a wall-clock timestamp in epoch milliseconds and, for
/// server-scoped kinds, the upstream name. `data` is an opaque bag for
/// surface-specific extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A single upstream's runtime state changed.
    #[serde(rename = "server_state_changed")]
    ServerStateChanged {
        server: ServerName,
        old_state: String,
        new_state: String,
        ts_ms: u64,
        #[serde(default, skip_serializing_if = "is_null")]
        data: Value,
    },

    /// A single upstream's configuration changed (startup mode, transport
    /// fields, group). `old_state`/`new_state` carry startup modes here.
    #[serde(rename = "server_config_changed")]
    ServerConfigChanged {
        server: ServerName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_state: Option<String>,
        ts_ms: u64,
        #[serde(default, skip_serializing_if = "is_null")]
        data: Value,
    },

    /// The aggregate application state changed.
    #[serde(rename = "app_state_changed")]
    AppStateChanged {
        old_state: String,
        new_state: String,
        ts_ms: u64,
    },

    /// An upstream was demoted to `auto_disabled` by the system.
    #[serde(rename = "server_auto_disabled")]
    ServerAutoDisabled {
        server: ServerName,
        reason: String,
        ts_ms: u64,
    },

    /// A group operation touched this upstream.
    #[serde(rename = "server_group_updated")]
    ServerGroupUpdated {
        server: ServerName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<u64>,
        ts_ms: u64,
    },

    /// An upstream's tool list was (re)discovered or its cache updated.
    #[serde(rename = "tools_updated")]
    ToolsUpdated {
        server: ServerName,
        tool_count: usize,
        hash: String,
        ts_ms: u64,
    },
}

/// Discriminant of [`Event`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerStateChanged,
    ServerConfigChanged,
    AppStateChanged,
    ServerAutoDisabled,
    ServerGroupUpdated,
    ToolsUpdated,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ServerStateChanged { .. } => EventKind::ServerStateChanged,
            Event::ServerConfigChanged { .. } => EventKind::ServerConfigChanged,
            Event::AppStateChanged { .. } => EventKind::AppStateChanged,
            Event::ServerAutoDisabled { .. } => EventKind::ServerAutoDisabled,
            Event::ServerGroupUpdated { .. } => EventKind::ServerGroupUpdated,
            Event::ToolsUpdated { .. } => EventKind::ToolsUpdated,
        }
    }

    /// The upstream this event is scoped to, if any.
    pub fn server(&self) -> Option<&ServerName> {
        match self {
            Event::ServerStateChanged { server, .. }
            | Event::ServerConfigChanged { server, .. }
            | Event::ServerAutoDisabled { server, .. }
            | Event::ServerGroupUpdated { server, .. }
            | Event::ToolsUpdated { server, .. } => Some(server),
            Event::AppStateChanged { .. } => None,
        }
    }

    pub fn ts_ms(&self) -> u64 {
        match self {
            Event::ServerStateChanged { ts_ms, .. }
            | Event::ServerConfigChanged { ts_ms, .. }
            | Event::AppStateChanged { ts_ms, .. }
            | Event::ServerAutoDisabled { ts_ms, .. }
            | Event::ServerGroupUpdated { ts_ms, .. }
            | Event::ToolsUpdated { ts_ms, .. } => *ts_ms,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
