// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Persisted sliding-window admission control for generation requests

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::clock::Clock;
use super::store::StateStore;

/// Default admission budget per window
pub const MAX_PER_WINDOW: usize = 5;

/// Default window length
pub const WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default store key for the persisted timestamp log
pub const DEFAULT_QUOTA_KEY: &str = "idphoto.generation.log";

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub admitted: bool,
    pub active_count: usize,
    pub limit: usize,
    /// When the oldest in-window entry frees its slot (epoch ms)
    pub next_expiry_at: Option<u64>,
}

/// Snapshot of current quota consumption for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub used: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_expiry_at: Option<u64>,
}

/// Sliding-window rate limiter over a persisted timestamp log.
///
/// The log lives in the [`StateStore`] as a JSON array of epoch-millisecond
/// numbers and is reloaded, pruned, and persisted around every admission
/// check. Absent or corrupt data heals to an empty log. The read-prune-append
/// sequence is serialized through an internal mutex so the admission
/// invariant holds even with concurrent callers.
pub struct SlidingWindowLimiter {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    key: String,
    limit: usize,
    window: Duration,
    admission: Mutex<()>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(store, clock, MAX_PER_WINDOW, WINDOW)
    }

    /// Create a limiter with a custom budget and window (for testing)
    pub fn with_window(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        limit: usize,
        window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            key: DEFAULT_QUOTA_KEY.to_string(),
            limit,
            window,
            admission: Mutex::new(()),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Parse the raw store value. Anything that is not a JSON array of
    /// numbers is treated as an empty log.
    fn parse_log(raw: Option<String>) -> Vec<u64> {
        match raw {
            Some(raw) => serde_json::from_str::<Vec<u64>>(&raw).unwrap_or_else(|e| {
                warn!("Quota log corrupt, resetting to empty: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    fn prune(&self, log: &mut Vec<u64>, now: u64) {
        log.sort_unstable();
        let window_ms = self.window_ms();
        log.retain(|&t| now.saturating_sub(t) < window_ms);
    }

    async fn persist(&self, log: &[u64]) {
        let raw = match serde_json::to_string(log) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize quota log: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &raw).await {
            warn!("Failed to persist quota log: {}", e);
        }
    }

    /// Read the raw log without pruning or persisting. Used by the countdown
    /// so the zero-remaining edge of the head entry stays observable.
    pub async fn peek(&self) -> Vec<u64> {
        let mut log = Self::parse_log(self.store.get(&self.key).await);
        log.sort_unstable();
        log
    }

    /// Load the log from the store, prune expired entries, and write the
    /// cleaned log back unconditionally. Never fails; corrupt state heals to
    /// an empty log.
    pub async fn load(&self) -> Vec<u64> {
        let _guard = self.admission.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Vec<u64> {
        let mut log = Self::parse_log(self.store.get(&self.key).await);
        self.prune(&mut log, self.clock.now_ms());
        self.persist(&log).await;
        log
    }

    /// Reload the log and decide admission for a new generation attempt.
    /// On admission the current timestamp is appended and persisted before
    /// returning; on denial the log is left unchanged.
    pub async fn try_admit(&self) -> AdmissionDecision {
        let _guard = self.admission.lock().await;
        let mut log = self.load_locked().await;
        let now = self.clock.now_ms();

        if log.len() >= self.limit {
            debug!(
                "Generation denied: {}/{} slots used in window",
                log.len(),
                self.limit
            );
            return AdmissionDecision {
                admitted: false,
                active_count: log.len(),
                limit: self.limit,
                next_expiry_at: self.next_expiry(&log),
            };
        }

        log.push(now);
        self.persist(&log).await;
        AdmissionDecision {
            admitted: true,
            active_count: log.len(),
            limit: self.limit,
            next_expiry_at: self.next_expiry(&log),
        }
    }

    /// Expiry instant of the oldest in-window entry. The log is kept
    /// ascending, so the head is always the next to expire.
    pub fn next_expiry(&self, log: &[u64]) -> Option<u64> {
        log.first().map(|&t| t + self.window_ms())
    }

    /// Current usage snapshot after a fresh load
    pub async fn usage(&self) -> QuotaUsage {
        let log = self.load().await;
        QuotaUsage {
            used: log.len(),
            limit: self.limit,
            next_expiry_at: self.next_expiry(&log),
        }
    }

    /// Milliseconds until the oldest entry frees its slot, clamped at zero
    pub fn remaining_ms(&self, log: &[u64]) -> Option<u64> {
        self.next_expiry(log)
            .map(|expiry| expiry.saturating_sub(self.clock.now_ms()))
    }
}
