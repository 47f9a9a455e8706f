// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session status state machine observed by the presentation layer

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How long a renderer should display a settled success/failure status
/// before decaying back to its idle presentation. Display-only; not a
/// transition of the machine itself.
pub const RESULT_DISPLAY_MS: u64 = 2_000;

/// Four-way classification of the current generation session, plus idle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Failure,
    Terminating,
}

/// Reentrant status machine. Transitions outside the table are logged and
/// ignored rather than panicking; there is no terminal state.
#[derive(Debug, Default)]
pub struct StatusMachine {
    status: GenerationStatus,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> GenerationStatus {
        self.status
    }

    /// A session is in flight; new requests must be refused
    pub fn is_busy(&self) -> bool {
        self.status == GenerationStatus::Loading
    }

    /// Apply a transition. Returns whether the transition was accepted.
    pub fn transition(&mut self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        let allowed = matches!(
            (self.status, next),
            // Session start, including starting over from a settled state
            (Idle | Success | Failure | Terminating, Loading)
                // Session outcome
                | (Loading, Success)
                | (Loading, Failure)
                | (Loading, Terminating)
                // Explicit reset; a no-op reset while idle is harmless
                | (Idle | Success | Failure | Terminating, Idle)
        );
        if allowed {
            self.status = next;
        } else {
            warn!(
                "Ignoring invalid status transition {:?} -> {:?}",
                self.status, next
            );
        }
        allowed
    }
}
