// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Candidate verification against the source photo via a VLM sidecar

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Similarity oracle for generated candidates. Implementations must degrade
/// every internal failure to `false` (treat as non-matching); verification
/// never aborts a generation run.
#[async_trait::async_trait]
pub trait ImageVerifier: Send + Sync {
    async fn verify(&self, source: &Bytes, candidate: &Bytes) -> bool;
}

// --- OpenAI-compatible chat types ---

#[derive(serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(serde::Serialize)]
struct ChatMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Verdict the VLM is instructed to answer with
#[derive(Debug, Deserialize)]
struct MatchVerdict {
    #[serde(rename = "match")]
    is_match: bool,
}

const VERIFY_PROMPT: &str = "These two images are a person's original photo and a generated \
     ID-photo candidate. Determine whether they clearly show the same person: same facial \
     structure, same apparent age range, no identity-altering changes.\n\n\
     Respond with a JSON object:\n\
     {\"match\": true/false}\n\n\
     Only respond with the JSON object, no extra text.";

/// Verifier that asks a VLM sidecar whether the candidate portrays the same
/// person as the source photo.
pub struct VlmPortraitVerifier {
    client: Client,
    endpoint: String,
    model_name: String,
}

impl VlmPortraitVerifier {
    pub fn new(endpoint: &str, model_name: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        info!(
            "Portrait verifier configured: endpoint={}, model={}",
            endpoint, model_name
        );

        Ok(Self {
            client,
            endpoint,
            model_name: model_name.to_string(),
        })
    }

    fn image_part(image: &Bytes) -> serde_json::Value {
        serde_json::json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/png;base64,{}", BASE64.encode(image)) }
        })
    }

    /// Parse the VLM verdict. Malformed output defaults to non-matching.
    fn parse_verdict(raw: &str) -> bool {
        match serde_json::from_str::<MatchVerdict>(raw.trim()) {
            Ok(verdict) => verdict.is_match,
            Err(e) => {
                warn!("Unparseable verification verdict, treating as mismatch: {}", e);
                false
            }
        }
    }

    async fn ask(&self, source: &Bytes, candidate: &Bytes) -> anyhow::Result<bool> {
        let request = ChatRequest {
            model: self.model_name.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: serde_json::json!([
                    { "type": "text", "text": VERIFY_PROMPT },
                    Self::image_part(source),
                    Self::image_part(candidate),
                ]),
            }],
            max_tokens: 64,
            temperature: 0.0,
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        debug!("Verification POST {}", url);

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("VLM sidecar returned {}: {}", status, text));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(Self::parse_verdict(&content))
    }
}

#[async_trait::async_trait]
impl ImageVerifier for VlmPortraitVerifier {
    async fn verify(&self, source: &Bytes, candidate: &Bytes) -> bool {
        match self.ask(source, candidate).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Verification failed, treating candidate as mismatch: {}", e);
                false
            }
        }
    }
}
