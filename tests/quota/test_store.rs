// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tests for the JSON-file state store

use idphoto_engine::{FileStateStore, StateStore};

#[tokio::test]
async fn missing_file_reads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path().join("state.json"));
    assert_eq!(store.get("anything").await, None);
}

#[tokio::test]
async fn values_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path().join("state.json"));

    store.set("log", "[1,2,3]").await.unwrap();
    store.set("other", "x").await.unwrap();
    assert_eq!(store.get("log").await.as_deref(), Some("[1,2,3]"));
    assert_eq!(store.get("other").await.as_deref(), Some("x"));

    // A second store against the same file sees persisted state
    let reopened = FileStateStore::new(dir.path().join("state.json"));
    assert_eq!(reopened.get("log").await.as_deref(), Some("[1,2,3]"));
}

#[tokio::test]
async fn corrupt_file_reads_as_empty_and_recovers_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, "{{{ not json").await.unwrap();

    let store = FileStateStore::new(&path);
    assert_eq!(store.get("log").await, None);

    store.set("log", "[]").await.unwrap();
    assert_eq!(store.get("log").await.as_deref(), Some("[]"));
}

#[tokio::test]
async fn creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deep").join("state.json");
    let store = FileStateStore::new(&path);

    store.set("k", "v").await.unwrap();
    assert_eq!(store.get("k").await.as_deref(), Some("v"));
}
