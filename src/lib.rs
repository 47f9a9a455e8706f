// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod config;
pub mod engine;
pub mod generation;
pub mod quota;

// Re-export main types
pub use config::EngineConfig;
pub use engine::{EngineError, EngineEvent, GenerationSession, PhotoEngine, RequestKind};
pub use generation::{
    AttemptEvent, AttemptOutcome, Expression, GenerationStatus, ImageGenerator, ImageVerifier,
    PromptOptions, PromptProvider, RetryingGenerator, SidecarImageClient, StatusMachine,
    StudioPromptProvider, VlmPortraitVerifier, MAX_ATTEMPTS,
};
pub use quota::{
    format_remaining, AdmissionDecision, Clock, CountdownEvent, CountdownHandle, FileStateStore,
    ManualClock, MemoryStateStore, QuotaCountdown, QuotaUsage, SlidingWindowLimiter, StateStore,
    SystemClock, MAX_PER_WINDOW, WINDOW,
};
