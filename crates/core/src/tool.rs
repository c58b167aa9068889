// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool descriptors and tool-list content hashing.
//!
//! The hash lets lazy upstreams serve tools from cache and lets the manager
//! detect schema drift without re-indexing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One tool as reported by a downstream's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Content hash of a single tool's observable surface.
pub fn tool_hash(tool: &ToolDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.name.as_bytes());
    hasher.update([0]);
    hasher.update(tool.description.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    // serde_json maps are key-sorted, so this serialization is canonical.
    hasher.update(tool.input_schema.to_string().as_bytes());
    hex_digest(hasher)
}

/// Content hash of a whole tool list, independent of reporting order.
pub fn tool_list_hash(tools: &[ToolDescriptor]) -> String {
    let mut hashes: Vec<String> = tools.iter().map(tool_hash).collect();
    hashes.sort();
    let mut hasher = Sha256::new();
    for h in &hashes {
        hasher.update(h.as_bytes());
        hasher.update([b'\n']);
    }
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;
