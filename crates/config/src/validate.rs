// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config invariant checks.
//!
//! Runs after decode on every load and before every save. A failed
//! validation leaves the previous snapshot in effect.

use crate::{Config, ConfigError, TransportKind};
use std::collections::HashSet;

/// Validate the structural invariants of a configuration.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut seen: HashSet<&str> = HashSet::new();

    for upstream in &config.mcp_servers {
        let name = upstream.name.as_str();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateName(name.to_string()));
        }

        match upstream.protocol {
            TransportKind::Stdio => {
                if upstream.command.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::MissingField {
                        server: name.to_string(),
                        protocol: upstream.protocol.to_string(),
                        field: "command",
                    });
                }
            }
            kind if kind.is_http_family() => {
                if upstream.url.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::MissingField {
                        server: name.to_string(),
                        protocol: upstream.protocol.to_string(),
                        field: "url",
                    });
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
