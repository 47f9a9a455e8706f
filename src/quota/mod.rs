// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Sliding-window generation quota with persisted state and a live countdown

pub mod clock;
pub mod countdown;
pub mod limiter;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use countdown::{format_remaining, CountdownEvent, CountdownHandle, QuotaCountdown};
pub use limiter::{
    AdmissionDecision, QuotaUsage, SlidingWindowLimiter, DEFAULT_QUOTA_KEY, MAX_PER_WINDOW, WINDOW,
};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
