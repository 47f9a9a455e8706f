// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Live countdown over the quota window, ticking once per second

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::limiter::{QuotaUsage, SlidingWindowLimiter};

/// Events emitted by the countdown task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownEvent {
    /// No quota is consumed; nothing to count down
    Idle,
    /// Time until the oldest in-window entry frees its slot
    Tick { remaining_ms: u64 },
    /// The oldest entry expired; usage reflects the freshly pruned log
    SlotFreed { usage: QuotaUsage },
}

/// Handle to a running countdown task. `stop` is idempotent and safe to
/// call when the task has already finished.
#[derive(Debug, Clone)]
pub struct CountdownHandle {
    token: CancellationToken,
}

impl CountdownHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Periodic task that re-evaluates the quota window every second and fans
/// events out to subscribers.
pub struct QuotaCountdown {
    limiter: Arc<SlidingWindowLimiter>,
    tick_period: Duration,
    subscribers: Arc<RwLock<Vec<mpsc::Sender<CountdownEvent>>>>,
}

impl QuotaCountdown {
    pub fn new(limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self {
            limiter,
            tick_period: Duration::from_secs(1),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Shorten the tick period (for testing)
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<CountdownEvent> {
        let (tx, rx) = mpsc::channel(100);
        self.subscribers.write().await.push(tx);
        rx
    }

    async fn emit(subscribers: &RwLock<Vec<mpsc::Sender<CountdownEvent>>>, event: CountdownEvent) {
        let subscribers = subscribers.read().await;
        for subscriber in subscribers.iter() {
            let _ = subscriber.send(event.clone()).await;
        }
    }

    /// Spawn the countdown loop. Each tick reads the log; an empty log emits
    /// [`CountdownEvent::Idle`], a zero remaining time triggers a pruning
    /// reload and [`CountdownEvent::SlotFreed`], anything else emits a
    /// [`CountdownEvent::Tick`].
    pub fn start(&self) -> CountdownHandle {
        let token = CancellationToken::new();
        let handle = CountdownHandle {
            token: token.clone(),
        };
        let limiter = self.limiter.clone();
        let subscribers = self.subscribers.clone();
        let tick_period = self.tick_period;

        tokio::spawn(async move {
            let mut ticker = interval(tick_period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Quota countdown stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let log = limiter.peek().await;
                        if log.is_empty() {
                            Self::emit(&subscribers, CountdownEvent::Idle).await;
                            continue;
                        }
                        match limiter.remaining_ms(&log) {
                            Some(0) | None => {
                                // Head entry expired: prune it and restart the
                                // countdown for the next-oldest entry.
                                limiter.load().await;
                                let usage = limiter.usage().await;
                                debug!("Quota slot freed: {}/{}", usage.used, usage.limit);
                                Self::emit(&subscribers, CountdownEvent::SlotFreed { usage }).await;
                            }
                            Some(remaining_ms) => {
                                Self::emit(&subscribers, CountdownEvent::Tick { remaining_ms }).await;
                            }
                        }
                    }
                }
            }
        });

        handle
    }
}

/// Render a remaining duration as `m:ss`, rounding up to the next second so
/// a live display never shows 0:00 while time is still left.
pub fn format_remaining(remaining_ms: u64) -> String {
    let total_secs = remaining_ms.div_ceil(1_000);
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}
