// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bounded retry loop against the unreliable generation capability

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::ImageGenerator;
use super::prompt::{PromptOptions, PromptProvider};
use super::verifier::ImageVerifier;

/// Attempt budget for one generation session
pub const MAX_ATTEMPTS: u32 = 5;

/// Terminal outcome of one retry run
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// A candidate was produced (and validated, when validation applies)
    Success(Bytes),
    /// The attempt budget ran out without an acceptable candidate
    Rejected,
    /// Cancellation was observed at an attempt boundary
    Terminated,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }
}

/// Advisory progress notifications; they never affect control flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    AttemptStarted { attempt: u32, max_attempts: u32 },
    ValidationStarted { attempt: u32 },
}

/// What one run produced and how much of the budget it consumed
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: AttemptOutcome,
    pub attempts_made: u32,
}

/// Drives the generation capability up to [`MAX_ATTEMPTS`] times per run.
///
/// Attempts are strictly sequential; a transport error or an empty payload
/// consumes the attempt and the loop advances. Cancellation is cooperative,
/// sampled before each generate call and before each validation call, never
/// pre-empting a call already in flight.
pub struct RetryingGenerator {
    generator: Arc<dyn ImageGenerator>,
    prompts: Arc<dyn PromptProvider>,
    max_attempts: u32,
    event_subscribers: Arc<RwLock<Vec<mpsc::Sender<AttemptEvent>>>>,
}

impl RetryingGenerator {
    pub fn new(generator: Arc<dyn ImageGenerator>, prompts: Arc<dyn PromptProvider>) -> Self {
        Self {
            generator,
            prompts,
            max_attempts: MAX_ATTEMPTS,
            event_subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Override the attempt budget (for testing)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn subscribe_to_events(&self) -> mpsc::Receiver<AttemptEvent> {
        let (tx, rx) = mpsc::channel(100);
        self.event_subscribers.write().await.push(tx);
        rx
    }

    async fn emit_event(&self, event: AttemptEvent) {
        let subscribers = self.event_subscribers.read().await;
        for subscriber in subscribers.iter() {
            let _ = subscriber.send(event.clone()).await;
        }
    }

    /// Run one generation session. A fresh prompt is built per attempt; the
    /// validator, when supplied, gates each candidate.
    pub async fn run(
        &self,
        source: &Bytes,
        options: &PromptOptions,
        validator: Option<&Arc<dyn ImageVerifier>>,
        cancel: &CancellationToken,
    ) -> RunReport {
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                debug!("Generation cancelled before attempt {}", attempt);
                return RunReport {
                    outcome: AttemptOutcome::Terminated,
                    attempts_made: attempt - 1,
                };
            }

            self.emit_event(AttemptEvent::AttemptStarted {
                attempt,
                max_attempts: self.max_attempts,
            })
            .await;

            let prompt = self.prompts.build(options);
            let candidate = match self.generator.generate(&prompt, source).await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => {
                    debug!(
                        "Attempt {}/{} returned no image payload",
                        attempt, self.max_attempts
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} failed with transient error: {}",
                        attempt, self.max_attempts, e
                    );
                    continue;
                }
            };

            let validator = match validator {
                Some(validator) => validator,
                None => {
                    return RunReport {
                        outcome: AttemptOutcome::Success(candidate),
                        attempts_made: attempt,
                    };
                }
            };

            if cancel.is_cancelled() {
                debug!("Generation cancelled before validating attempt {}", attempt);
                return RunReport {
                    outcome: AttemptOutcome::Terminated,
                    attempts_made: attempt,
                };
            }

            self.emit_event(AttemptEvent::ValidationStarted { attempt })
                .await;

            if validator.verify(source, &candidate).await {
                return RunReport {
                    outcome: AttemptOutcome::Success(candidate),
                    attempts_made: attempt,
                };
            }
            debug!(
                "Attempt {}/{} produced a candidate that failed validation",
                attempt, self.max_attempts
            );
        }

        RunReport {
            outcome: AttemptOutcome::Rejected,
            attempts_made: self.max_attempts,
        }
    }
}
