// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Orchestrates quota admission, the retry loop, and status reporting

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::generation::retry::{AttemptEvent, AttemptOutcome, RetryingGenerator};
use crate::generation::status::{GenerationStatus, StatusMachine};
use crate::generation::{ImageGenerator, ImageVerifier, PromptOptions, PromptProvider};
use crate::quota::limiter::{QuotaUsage, SlidingWindowLimiter};

/// Whether a request is the first generation for the current photo or a
/// retry of a settled one. Only initial failures feed the advisory counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Generate,
    Regenerate,
}

/// Errors surfaced to the caller before any generation work happens
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("generation quota exceeded: {active}/{limit} slots used")]
    QuotaExceeded {
        active: usize,
        limit: usize,
        /// When the oldest slot frees (epoch ms), for countdown display
        retry_at: Option<u64>,
    },

    #[error("a generation session is already in flight")]
    SessionInFlight,

    #[error("no source photo has been set")]
    NoSourcePhoto,
}

/// Record of one finished orchestration call
#[derive(Debug, Clone)]
pub struct GenerationSession {
    pub id: Uuid,
    pub kind: RequestKind,
    pub attempts_made: u32,
    pub terminated: bool,
    pub outcome: AttemptOutcome,
}

/// Events for the presentation layer's status and quota surfaces
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(GenerationStatus),
    QuotaUpdated(QuotaUsage),
}

/// Composition root of the engine: admission control around the retry loop.
///
/// Quota is consumed before the remote call; a failed generation still
/// counts against the limit.
pub struct PhotoEngine {
    limiter: Arc<SlidingWindowLimiter>,
    retry: RetryingGenerator,
    verifier: Arc<dyn ImageVerifier>,
    options: RwLock<PromptOptions>,
    source_photo: RwLock<Option<Bytes>>,
    result: RwLock<Option<Bytes>>,
    status: RwLock<StatusMachine>,
    failure_count: RwLock<u32>,
    cancel: RwLock<CancellationToken>,
    session_gate: Mutex<()>,
    event_subscribers: RwLock<Vec<mpsc::Sender<EngineEvent>>>,
}

impl PhotoEngine {
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        generator: Arc<dyn ImageGenerator>,
        verifier: Arc<dyn ImageVerifier>,
        prompts: Arc<dyn PromptProvider>,
    ) -> Self {
        Self {
            limiter,
            retry: RetryingGenerator::new(generator, prompts),
            verifier,
            options: RwLock::new(PromptOptions::default()),
            source_photo: RwLock::new(None),
            result: RwLock::new(None),
            status: RwLock::new(StatusMachine::new()),
            failure_count: RwLock::new(0),
            cancel: RwLock::new(CancellationToken::new()),
            session_gate: Mutex::new(()),
            event_subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Override the attempt budget (for testing)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry = self.retry.with_max_attempts(max_attempts);
        self
    }

    pub async fn subscribe_to_events(&self) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(100);
        self.event_subscribers.write().await.push(tx);
        rx
    }

    /// Per-attempt progress notifications from the retry loop
    pub async fn subscribe_to_attempts(&self) -> mpsc::Receiver<AttemptEvent> {
        self.retry.subscribe_to_events().await
    }

    async fn emit_event(&self, event: EngineEvent) {
        let subscribers = self.event_subscribers.read().await;
        for subscriber in subscribers.iter() {
            let _ = subscriber.send(event.clone()).await;
        }
    }

    async fn set_status(&self, next: GenerationStatus) {
        let changed = self.status.write().await.transition(next);
        if changed {
            self.emit_event(EngineEvent::StatusChanged(next)).await;
        }
    }

    /// Install a new source photo. Clears any previous result and resets the
    /// advisory failure counter.
    pub async fn set_source_photo(&self, photo: Bytes) {
        *self.source_photo.write().await = Some(photo);
        *self.result.write().await = None;
        *self.failure_count.write().await = 0;
        debug!("Source photo installed");
    }

    pub async fn set_options(&self, options: PromptOptions) {
        *self.options.write().await = options;
    }

    /// Request cooperative cancellation of the in-flight session. Takes
    /// effect at the next attempt boundary; an in-flight remote call is
    /// never interrupted.
    pub async fn cancel(&self) {
        self.cancel.read().await.cancel();
    }

    /// Explicit reset: status back to idle, failure counter zeroed, result
    /// dropped. Ignored while a session is in flight.
    pub async fn clear(&self) {
        if self.status.read().await.is_busy() {
            debug!("Ignoring clear while a session is in flight");
            return;
        }
        self.set_status(GenerationStatus::Idle).await;
        *self.result.write().await = None;
        *self.failure_count.write().await = 0;
    }

    pub async fn status(&self) -> GenerationStatus {
        self.status.read().await.current()
    }

    pub async fn result(&self) -> Option<Bytes> {
        self.result.read().await.clone()
    }

    /// Advisory failure counter; informational only, never blocks requests
    pub async fn failure_count(&self) -> u32 {
        *self.failure_count.read().await
    }

    pub async fn quota(&self) -> QuotaUsage {
        self.limiter.usage().await
    }

    /// Run one user-initiated generation request end to end.
    ///
    /// Admission is checked against a freshly loaded quota log before any
    /// remote work; a denial has no side effects and leaves the status
    /// machine untouched.
    pub async fn request_generation(
        &self,
        kind: RequestKind,
    ) -> Result<GenerationSession, EngineError> {
        let _gate = self
            .session_gate
            .try_lock()
            .map_err(|_| EngineError::SessionInFlight)?;
        if self.status.read().await.is_busy() {
            return Err(EngineError::SessionInFlight);
        }

        let source = self
            .source_photo
            .read()
            .await
            .clone()
            .ok_or(EngineError::NoSourcePhoto)?;

        let decision = self.limiter.try_admit().await;
        self.emit_event(EngineEvent::QuotaUpdated(QuotaUsage {
            used: decision.active_count,
            limit: decision.limit,
            next_expiry_at: decision.next_expiry_at,
        }))
        .await;
        if !decision.admitted {
            info!(
                "Generation denied by quota: {}/{}",
                decision.active_count, decision.limit
            );
            return Err(EngineError::QuotaExceeded {
                active: decision.active_count,
                limit: decision.limit,
                retry_at: decision.next_expiry_at,
            });
        }

        self.set_status(GenerationStatus::Loading).await;

        let token = CancellationToken::new();
        *self.cancel.write().await = token.clone();

        let options = self.options.read().await.clone();
        let validator = if options.validation_enabled() {
            Some(&self.verifier)
        } else {
            None
        };

        let report = self.retry.run(&source, &options, validator, &token).await;

        match &report.outcome {
            AttemptOutcome::Success(image) => {
                *self.result.write().await = Some(image.clone());
                self.set_status(GenerationStatus::Success).await;
            }
            AttemptOutcome::Rejected => {
                self.set_status(GenerationStatus::Failure).await;
                if kind == RequestKind::Generate {
                    *self.failure_count.write().await += 1;
                }
            }
            AttemptOutcome::Terminated => {
                self.set_status(GenerationStatus::Terminating).await;
            }
        }

        let usage = self.limiter.usage().await;
        self.emit_event(EngineEvent::QuotaUpdated(usage)).await;

        Ok(GenerationSession {
            id: Uuid::new_v4(),
            kind,
            attempts_made: report.attempts_made,
            terminated: matches!(report.outcome, AttemptOutcome::Terminated),
            outcome: report.outcome,
        })
    }
}
