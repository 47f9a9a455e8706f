// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tests for the bounded retry loop

use anyhow::Result;
use bytes::Bytes;
use idphoto_engine::{
    AttemptEvent, AttemptOutcome, ImageGenerator, ImageVerifier, PromptOptions, PromptProvider,
    RetryingGenerator, StudioPromptProvider,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted response from the mock generation capability
enum Step {
    Fail,
    Empty,
    Image(&'static [u8]),
}

struct ScriptedGenerator {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    /// Cancel this token while handling the given call number
    cancel_during: Option<(u32, CancellationToken)>,
}

impl ScriptedGenerator {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            cancel_during: None,
        }
    }

    fn cancelling(steps: Vec<Step>, call: u32, token: CancellationToken) -> Self {
        Self {
            cancel_during: Some((call, token)),
            ..Self::new(steps)
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, _image: &Bytes) -> Result<Option<Bytes>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, token)) = &self.cancel_during {
            if call == *n {
                token.cancel();
            }
        }
        match self.script.lock().await.pop_front() {
            Some(Step::Image(bytes)) => Ok(Some(Bytes::from_static(bytes))),
            Some(Step::Empty) => Ok(None),
            Some(Step::Fail) | None => Err(anyhow::anyhow!("model unreachable")),
        }
    }
}

struct ScriptedVerifier {
    verdicts: Mutex<VecDeque<bool>>,
    calls: AtomicU32,
}

impl ScriptedVerifier {
    fn new(verdicts: Vec<bool>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageVerifier for ScriptedVerifier {
    async fn verify(&self, _source: &Bytes, _candidate: &Bytes) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdicts.lock().await.pop_front().unwrap_or(true)
    }
}

fn prompts() -> Arc<dyn PromptProvider> {
    Arc::new(StudioPromptProvider)
}

fn source() -> Bytes {
    Bytes::from_static(b"source-photo")
}

#[tokio::test]
async fn succeeds_on_the_last_attempt_with_one_validation() {
    // No image payload on attempts 1-4, then a matching image on attempt 5
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Empty,
        Step::Empty,
        Step::Empty,
        Step::Empty,
        Step::Image(b"candidate"),
    ]));
    let verifier = Arc::new(ScriptedVerifier::new(vec![true]));
    let verifier_dyn: Arc<dyn ImageVerifier> = verifier.clone();
    let retry = RetryingGenerator::new(generator.clone(), prompts());

    let report = retry
        .run(
            &source(),
            &PromptOptions::default(),
            Some(&verifier_dyn),
            &CancellationToken::new(),
        )
        .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.attempts_made, 5);
    assert_eq!(generator.calls(), 5);
    assert_eq!(verifier.calls(), 1, "only the real candidate is validated");
}

#[tokio::test]
async fn empty_payloads_consume_the_budget() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Empty,
        Step::Empty,
        Step::Empty,
        Step::Empty,
        Step::Empty,
    ]));
    let retry = RetryingGenerator::new(generator.clone(), prompts());

    let report = retry
        .run(
            &source(),
            &PromptOptions::default(),
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(report.outcome, AttemptOutcome::Rejected));
    assert_eq!(report.attempts_made, 5);
    assert_eq!(generator.calls(), 5);
}

#[tokio::test]
async fn rejected_candidates_consume_the_budget() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Image(b"a"),
        Step::Image(b"b"),
        Step::Image(b"c"),
        Step::Image(b"d"),
        Step::Image(b"e"),
    ]));
    let verifier = Arc::new(ScriptedVerifier::new(vec![false; 5]));
    let verifier_dyn: Arc<dyn ImageVerifier> = verifier.clone();
    let retry = RetryingGenerator::new(generator.clone(), prompts());

    let report = retry
        .run(
            &source(),
            &PromptOptions::default(),
            Some(&verifier_dyn),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(report.outcome, AttemptOutcome::Rejected));
    assert_eq!(generator.calls(), 5);
    assert_eq!(verifier.calls(), 5);
}

#[tokio::test]
async fn bypassed_validation_never_calls_the_verifier() {
    // Cartoon mode: the caller passes no validator at all
    let generator = Arc::new(ScriptedGenerator::new(vec![Step::Image(b"toon")]));
    let retry = RetryingGenerator::new(generator.clone(), prompts());

    let report = retry
        .run(
            &source(),
            &PromptOptions {
                cartoon_mode: true,
                ..Default::default()
            },
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.attempts_made, 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn cancellation_before_the_first_attempt_makes_no_calls() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Step::Image(b"unused")]));
    let retry = RetryingGenerator::new(generator.clone(), prompts());

    let token = CancellationToken::new();
    token.cancel();
    let report = retry
        .run(&source(), &PromptOptions::default(), None, &token)
        .await;

    assert!(matches!(report.outcome, AttemptOutcome::Terminated));
    assert_eq!(report.attempts_made, 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn cancellation_between_attempts_stops_the_loop() {
    // Attempt 2 fails transiently and cancellation lands while it runs;
    // the loop must observe the flag before attempt 3.
    let token = CancellationToken::new();
    let generator = Arc::new(ScriptedGenerator::cancelling(
        vec![Step::Fail, Step::Fail, Step::Image(b"late")],
        2,
        token.clone(),
    ));
    let retry = RetryingGenerator::new(generator.clone(), prompts());

    let report = retry
        .run(&source(), &PromptOptions::default(), None, &token)
        .await;

    assert!(matches!(report.outcome, AttemptOutcome::Terminated));
    assert_eq!(report.attempts_made, 2);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn emits_progress_events_per_attempt() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Fail,
        Step::Image(b"candidate"),
    ]));
    let verifier: Arc<dyn ImageVerifier> = Arc::new(ScriptedVerifier::new(vec![true]));
    let retry = RetryingGenerator::new(generator, prompts());
    let mut events = retry.subscribe_to_events().await;

    retry
        .run(
            &source(),
            &PromptOptions::default(),
            Some(&verifier),
            &CancellationToken::new(),
        )
        .await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            AttemptEvent::AttemptStarted {
                attempt: 1,
                max_attempts: 5
            },
            AttemptEvent::AttemptStarted {
                attempt: 2,
                max_attempts: 5
            },
            AttemptEvent::ValidationStarted { attempt: 2 },
        ]
    );
}

#[tokio::test]
async fn shortened_budget_is_respected() {
    let generator = Arc::new(ScriptedGenerator::new(vec![]));
    let retry = RetryingGenerator::new(generator.clone(), prompts()).with_max_attempts(2);

    let report = retry
        .run(
            &source(),
            &PromptOptions::default(),
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(report.outcome, AttemptOutcome::Rejected));
    assert_eq!(generator.calls(), 2);
}
