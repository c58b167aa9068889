// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mcpproxy-core: shared types for the MCP aggregating proxy.
//!
//! Holds the vocabulary the rest of the workspace speaks: upstream names,
//! startup modes and runtime states, the typed event stream, the in-process
//! event bus, tool descriptors with content hashing, and the clock
//! abstraction used to keep time testable.

pub mod bus;
pub mod clock;
pub mod event;
pub mod id;
pub mod mode;
pub mod tool;

pub use bus::{EventBus, Subscription, SUBSCRIBER_QUEUE_CAPACITY};
pub use clock::{Clock, FakeClock, SystemClock};
pub use event::{Event, EventKind};
pub use mode::{AppState, RuntimeState, StartupMode};
pub use tool::{tool_list_hash, ToolDescriptor};

crate::define_id! {
    /// Name of one upstream MCP server, unique within a configuration.
    ///
    /// Names come from the config file and double as the key for the
    /// persistent store, the per-server log file, and every event on the bus.
    #[derive(Default, PartialOrd, Ord)]
    pub struct ServerName;
}
