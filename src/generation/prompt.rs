// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prompt construction for the ID-photo transformation

use serde::{Deserialize, Serialize};

/// Facial expression requested for the output portrait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    #[default]
    Neutral,
    Smile,
}

/// Options controlling prompt construction for one generation session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    pub expression: Expression,
    pub remove_glasses: bool,
    /// Cartoon output looks nothing like the source, so candidate
    /// validation is bypassed entirely when this is set.
    pub cartoon_mode: bool,
    #[serde(default)]
    pub cartoon_description: String,
}

impl PromptOptions {
    /// Whether candidate validation applies to sessions using these options
    pub fn validation_enabled(&self) -> bool {
        !self.cartoon_mode
    }
}

/// Capability that turns [`PromptOptions`] into the text sent to the model.
/// The engine stays agnostic to prompt content.
pub trait PromptProvider: Send + Sync {
    fn build(&self, options: &PromptOptions) -> String;
}

const STUDIO_BASE: &str = "Transform this photo into a professional studio ID photo: \
     plain light-gray background, even front-facing studio lighting, \
     head-and-shoulders framing, subject centered and looking straight at the camera. \
     Preserve the subject's identity, facial features, and skin tone exactly.";

const CARTOON_BASE: &str = "Redraw the person in this photo as a stylized cartoon portrait \
     on a plain light background, head-and-shoulders framing, facing the camera.";

/// Default prompt provider producing studio ID-photo instructions
#[derive(Debug, Default)]
pub struct StudioPromptProvider;

impl PromptProvider for StudioPromptProvider {
    fn build(&self, options: &PromptOptions) -> String {
        let mut prompt = if options.cartoon_mode {
            let mut p = CARTOON_BASE.to_string();
            if !options.cartoon_description.trim().is_empty() {
                p.push_str(" Style: ");
                p.push_str(options.cartoon_description.trim());
                p.push('.');
            }
            p
        } else {
            STUDIO_BASE.to_string()
        };

        match options.expression {
            Expression::Neutral => prompt.push_str(" Keep a calm, neutral expression."),
            Expression::Smile => prompt.push_str(" Give the subject a gentle, natural smile."),
        }
        if options.remove_glasses {
            prompt.push_str(" Remove any eyeglasses from the face.");
        }

        prompt
    }
}
