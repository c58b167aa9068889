// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legacy config migration.
//!
//! Older config files carried four correlated booleans per upstream
//! (`enabled`, `quarantined`, `auto_disabled`, `start_on_boot`) that could
//! contradict each other. They collapse into the single `startup_mode`
//! field. Migration runs on the raw JSON value before typed decode, so a
//! partially-legacy file still loads; the rewritten file is saved once,
//! with a backup sidecar.

use serde_json::Value;

/// Derive `startup_mode` for upstreams that lack it and strip the legacy
/// flags. Returns true when anything changed.
pub fn migrate_value(root: &mut Value) -> bool {
    let Some(servers) = root.get_mut("mcpServers").and_then(Value::as_array_mut) else {
        return false;
    };

    let mut changed = false;
    for server in servers {
        let Some(obj) = server.as_object_mut() else {
            continue;
        };

        if !obj.contains_key("startup_mode") {
            let mode = derive_mode(
                flag(obj.get("enabled")).unwrap_or(true),
                flag(obj.get("quarantined")).unwrap_or(false),
                flag(obj.get("auto_disabled")).unwrap_or(false),
                flag(obj.get("start_on_boot")).unwrap_or(false),
            );
            obj.insert("startup_mode".to_string(), Value::String(mode.to_string()));
            changed = true;
        }

        for legacy in ["enabled", "quarantined", "auto_disabled", "start_on_boot"] {
            if obj.remove(legacy).is_some() {
                changed = true;
            }
        }
    }
    changed
}

/// Precedence: quarantine beats auto-disable beats user-disable beats the
/// boot preference.
fn derive_mode(enabled: bool, quarantined: bool, auto_disabled: bool, start_on_boot: bool) -> &'static str {
    if quarantined {
        "quarantined"
    } else if auto_disabled {
        "auto_disabled"
    } else if !enabled {
        "disabled"
    } else if start_on_boot {
        "active"
    } else {
        "lazy_loading"
    }
}

fn flag(value: Option<&Value>) -> Option<bool> {
    value.and_then(Value::as_bool)
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
