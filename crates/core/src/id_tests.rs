// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::ServerName;
use std::borrow::Borrow;

#[test]
fn server_name_construction_and_display() {
    let name = ServerName::new("github");
    assert_eq!(name.as_str(), "github");
    assert_eq!(name.to_string(), "github");
    assert_eq!(name, "github");
    assert_eq!(name, ServerName::from("github".to_string()));
}

#[test]
fn server_name_borrows_as_str() {
    let name = ServerName::new("fs");
    let s: &str = name.borrow();
    assert_eq!(s, "fs");
}

#[test]
fn server_name_serde_is_transparent_string() {
    let name = ServerName::new("weather");
    let json = serde_json::to_string(&name).unwrap();
    assert_eq!(json, r#""weather""#);
    let back: ServerName = serde_json::from_str(&json).unwrap();
    assert_eq!(back, name);
}
