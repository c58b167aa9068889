// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The store proper: named collections over the op log.
//!
//! Reads come from the in-memory index; writes append to the log before the
//! index is updated, so a crash can lose at most the op being written and
//! never an acknowledged one. `tx` batches multi-key updates into one
//! durable append.

use crate::log::{Op, OpLog};
use crate::StoreError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

/// Store schema version, persisted under `meta/schema`.
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Compact once the log grows past this size.
pub const COMPACTION_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Collection names. Adding one is backward-compatible; renaming one needs
/// a schema migration.
pub mod collections {
    /// Runtime shadow of each upstream, keyed by server name.
    pub const UPSTREAMS: &str = "upstreams";
    /// Cached tool schemas, keyed by `server:tool`.
    pub const TOOL_METADATA: &str = "tool_metadata";
    /// Tool-list hash per server, for cheap drift detection.
    pub const TOOL_HASH: &str = "toolhash";
    /// OAuth tokens, keyed by server name.
    pub const OAUTH_TOKENS: &str = "oauth_tokens";
    /// Cross-process OAuth rendezvous, keyed by server name.
    pub const OAUTH_COMPLETION: &str = "oauth_completion";
    /// Store metadata (schema version).
    pub const META: &str = "meta";
    /// Content-addressed call results; opaque to the store.
    pub const CACHE: &str = "cache";
}

type Collections = HashMap<String, BTreeMap<String, Value>>;

fn apply(data: &mut Collections, op: &Op) {
    match op {
        Op::Put { c, k, v } => {
            data.entry(c.clone()).or_default().insert(k.clone(), v.clone());
        }
        Op::Delete { c, k } => {
            if let Some(collection) = data.get_mut(c) {
                collection.remove(k);
            }
        }
    }
}

struct Inner {
    log: OpLog,
    data: Collections,
}

/// Embedded KV store with named collections.
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    /// Open or create the store at `path` and verify the schema version.
    ///
    /// A store written by a newer build refuses to open.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let (log, ops) = OpLog::open(path)?;
        let mut data = Collections::new();
        for op in &ops {
            apply(&mut data, op);
        }
        let store = Self {
            inner: Mutex::new(Inner { log, data }),
        };
        store.check_schema()?;
        Ok(store)
    }

    fn check_schema(&self) -> Result<(), StoreError> {
        let found = self
            .get(collections::META, "schema")
            .and_then(|v| v.as_u64());
        match found {
            None => self.put(collections::META, "schema", Value::from(CURRENT_SCHEMA_VERSION)),
            Some(v) if v > CURRENT_SCHEMA_VERSION => Err(StoreError::SchemaTooNew {
                found: v,
                supported: CURRENT_SCHEMA_VERSION,
            }),
            Some(v) if v < CURRENT_SCHEMA_VERSION => {
                // No chained migrations exist below v1 yet; stamp forward.
                info!(from = v, to = CURRENT_SCHEMA_VERSION, "migrating store schema");
                self.put(collections::META, "schema", Value::from(CURRENT_SCHEMA_VERSION))
            }
            Some(_) => Ok(()),
        }
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        inner.data.get(collection)?.get(key).cloned()
    }

    pub fn put(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.tx(|tx| {
            tx.put(collection, key, value);
            Ok(())
        })
    }

    pub fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        self.tx(|tx| {
            tx.delete(collection, key);
            Ok(())
        })
    }

    /// All entries of a collection, key-ordered.
    pub fn list(&self, collection: &str) -> Vec<(String, Value)> {
        let inner = self.inner.lock();
        inner
            .data
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Run a multi-key transaction. Ops buffer until `f` returns Ok, then
    /// commit with a single durable append; an error discards them all.
    pub fn tx(
        &self,
        f: impl FnOnce(&mut Tx<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Inner { log, data } = &mut *inner;

        let ops = {
            let mut tx = Tx {
                data: &*data,
                ops: Vec::new(),
            };
            f(&mut tx)?;
            tx.ops
        };

        log.append(&ops)?;
        for op in &ops {
            apply(data, op);
        }
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().log.size_bytes()
    }

    /// Rewrite the log when it has grown past the threshold.
    /// Returns true when a compaction ran.
    pub fn compact_if_needed(&self) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.log.size_bytes() <= COMPACTION_THRESHOLD_BYTES {
            return Ok(false);
        }
        let before = inner.log.size_bytes();
        let ops: Vec<Op> = inner
            .data
            .iter()
            .flat_map(|(c, entries)| {
                entries.iter().map(move |(k, v)| Op::Put {
                    c: c.clone(),
                    k: k.clone(),
                    v: v.clone(),
                })
            })
            .collect();
        inner.log.rewrite(ops.iter())?;
        info!(
            before_bytes = before,
            after_bytes = inner.log.size_bytes(),
            "compacted persistent store"
        );
        Ok(true)
    }
}

/// Buffered view of one in-flight transaction.
pub struct Tx<'a> {
    data: &'a Collections,
    ops: Vec<Op>,
}

impl Tx<'_> {
    /// Read through pending ops first, then the committed index.
    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        for op in self.ops.iter().rev() {
            match op {
                Op::Put { c, k, v } if c == collection && k == key => return Some(v.clone()),
                Op::Delete { c, k } if c == collection && k == key => return None,
                _ => {}
            }
        }
        self.data.get(collection)?.get(key).cloned()
    }

    pub fn put(&mut self, collection: &str, key: &str, value: Value) {
        self.ops.push(Op::Put {
            c: collection.to_string(),
            k: key.to_string(),
            v: value,
        });
    }

    pub fn delete(&mut self, collection: &str, key: &str) {
        self.ops.push(Op::Delete {
            c: collection.to_string(),
            k: key.to_string(),
        });
    }

    /// Keys of a collection as committed, ignoring pending ops.
    pub fn committed_keys(&self, collection: &str) -> Vec<String> {
        self.data
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
