// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! String key-value persistence for the generation quota log

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Persistence capability for engine state.
///
/// Reads are best-effort: a missing or unreadable key is `None`, never an
/// error. Writes report failures so callers can decide whether to tolerate
/// them.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store used in tests and single-run sessions
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON-file-backed store: one object mapping keys to string values.
///
/// The file is read in full on every access; the quota log is a handful of
/// numbers, so contention and size are not a concern here.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_entries(&self) -> HashMap<String, String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("State file {:?} not readable: {}", self.path, e);
                return HashMap::new();
            }
        };
        match serde_json::from_str::<HashMap<String, String>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("State file {:?} corrupt, starting empty: {}", self.path, e);
                HashMap::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.read_entries().await.remove(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_entries().await;
        entries.insert(key.to_string(), value.to_string());
        let raw = serde_json::to_string(&entries).context("serializing state file")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating state directory {:?}", parent))?;
            }
        }
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("writing state file {:?}", self.path))?;
        Ok(())
    }
}
