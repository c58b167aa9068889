// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-parallel connection admission with fair ordering.
//!
//! The gate bounds simultaneous connection attempts (dial + handshake +
//! discovery), never total time; the holder enforces per-phase timeouts.
//! `tokio::sync::Semaphore` queues waiters FIFO, and dropping a cancelled
//! acquire never consumes a permit, which is exactly the fairness and
//! cancellation contract required here.

use crate::EngineError;
use mcpproxy_core::ServerName;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default bound on simultaneous connection attempts.
pub const DEFAULT_CAPACITY: usize = 15;

/// Valid capacity range.
pub const CAPACITY_RANGE: std::ops::RangeInclusive<usize> = 1..=40;

/// One granted connection slot. Dropping it releases the slot and admits
/// the next waiter in FIFO order.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
    server: ServerName,
}

impl AdmissionSlot {
    pub fn server(&self) -> &ServerName {
        &self.server
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        trace!(server = %self.server, "admission slot released");
    }
}

/// FIFO-fair bounded concurrency gate.
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(*CAPACITY_RANGE.start(), *CAPACITY_RANGE.end());
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a slot. An already-cancelled token returns immediately
    /// without consuming one; cancellation while queued abandons the queue
    /// position.
    pub async fn acquire(
        &self,
        server: &ServerName,
        cancel: &CancellationToken,
    ) -> Result<AdmissionSlot, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                let permit = permit.map_err(|_| EngineError::GateClosed)?;
                trace!(server = %server, "admission slot granted");
                Ok(AdmissionSlot {
                    _permit: permit,
                    server: server.clone(),
                })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
