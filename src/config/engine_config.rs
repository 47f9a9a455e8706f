// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Engine configuration with TOML loading and environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::generation::retry::MAX_ATTEMPTS;
use crate::quota::limiter::{DEFAULT_QUOTA_KEY, MAX_PER_WINDOW, WINDOW};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// OpenAI-compatible image generation sidecar
    pub generation_endpoint: String,
    pub generation_model: String,
    /// VLM sidecar used for candidate verification
    pub verifier_endpoint: String,
    pub verifier_model: String,
    /// Admitted generations per rolling window
    pub max_per_window: usize,
    pub window_secs: u64,
    /// Attempt budget per generation session
    pub max_attempts: u32,
    /// Store key holding the persisted timestamp log
    pub quota_key: String,
    /// Path of the JSON state file
    pub state_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation_endpoint: "http://localhost:8003".to_string(),
            generation_model: "flux-schnell".to_string(),
            verifier_endpoint: "http://localhost:8004".to_string(),
            verifier_model: "qwen3-vl".to_string(),
            max_per_window: MAX_PER_WINDOW,
            window_secs: WINDOW.as_secs(),
            max_attempts: MAX_ATTEMPTS,
            quota_key: DEFAULT_QUOTA_KEY.to_string(),
            state_path: "./idphoto-state.json".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {:?}", path))
    }

    /// Apply `IDPHOTO_*` environment variable overrides on top of the
    /// loaded values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = env::var("IDPHOTO_GENERATION_ENDPOINT") {
            self.generation_endpoint = v;
        }
        if let Ok(v) = env::var("IDPHOTO_GENERATION_MODEL") {
            self.generation_model = v;
        }
        if let Ok(v) = env::var("IDPHOTO_VERIFIER_ENDPOINT") {
            self.verifier_endpoint = v;
        }
        if let Ok(v) = env::var("IDPHOTO_VERIFIER_MODEL") {
            self.verifier_model = v;
        }
        if let Some(v) = env::var("IDPHOTO_MAX_PER_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.max_per_window = v;
        }
        if let Some(v) = env::var("IDPHOTO_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.window_secs = v;
        }
        if let Some(v) = env::var("IDPHOTO_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.max_attempts = v;
        }
        if let Ok(v) = env::var("IDPHOTO_STATE_PATH") {
            self.state_path = v;
        }
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}
