// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image generation sidecar client via OpenAI-compatible API

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Remote generation capability: one prompt plus the source photo in, at
/// most one candidate image out. `Ok(None)` means the model answered
/// without an image payload; transport and model errors surface as `Err`.
#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, image: &Bytes) -> Result<Option<Bytes>>;
}

// --- OpenAI-compatible response types ---

#[derive(Debug, Deserialize)]
struct OpenAIImageResponse {
    data: Vec<OpenAIImageData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIImageData {
    b64_json: Option<String>,
}

/// Client for an image generation sidecar speaking the OpenAI-compatible
/// `/v1/images/generations` protocol with img2img extensions.
pub struct SidecarImageClient {
    client: Client,
    endpoint: String,
    model_name: String,
    size: String,
    strength: f32,
}

impl SidecarImageClient {
    pub fn new(endpoint: &str, model_name: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        info!(
            "Image generation client configured: endpoint={}, model={}",
            endpoint, model_name
        );

        Ok(Self {
            client,
            endpoint,
            model_name: model_name.to_string(),
            size: "768x1024".to_string(),
            strength: 0.65,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// How strongly the output may deviate from the source photo
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    /// Check if the generation sidecar is healthy
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Generation sidecar health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl ImageGenerator for SidecarImageClient {
    async fn generate(&self, prompt: &str, image: &Bytes) -> Result<Option<Bytes>> {
        let body = serde_json::json!({
            "prompt": prompt,
            "model": self.model_name,
            "size": self.size,
            "n": 1,
            "response_format": "b64_json",
            "image": BASE64.encode(image),
            "strength": self.strength,
        });

        let url = format!("{}/v1/images/generations", self.endpoint);
        debug!("Generation POST {}", url);

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "generation sidecar returned {}: {}",
                status,
                text
            ));
        }

        let api_response: OpenAIImageResponse = response.json().await?;
        let payload = match api_response.data.into_iter().next() {
            Some(OpenAIImageData {
                b64_json: Some(b64),
            }) => b64,
            _ => {
                debug!("Generation response carried no image payload");
                return Ok(None);
            }
        };

        let decoded = BASE64.decode(payload.as_bytes())?;
        Ok(Some(Bytes::from(decoded)))
    }
}
