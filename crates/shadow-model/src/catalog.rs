// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model catalog: provider derivation from model names and the mini-model
//! policy for cost-optimized side operations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

/// The kernel operation a model is being selected for.
///
/// The main agent stream uses the task's chosen model; title, commit-message
/// and PR-text generation run on the provider's mini model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    MainAgent,
    TaskTitle,
    CommitMessage,
    PrText,
}

impl Operation {
    /// Whether this operation runs on the cost-optimized mini model.
    pub fn uses_mini(&self) -> bool {
        !matches!(self, Self::MainAgent)
    }
}

/// Cost-optimized models per provider, used for title / commit / PR text.
pub const MINI_MODELS: &[(Provider, &str)] = &[
    (Provider::Anthropic, "claude-haiku-4-5"),
    (Provider::OpenAi, "gpt-5-mini"),
];

/// Derive the provider from a model name.
///
/// Claude models belong to Anthropic; GPT and o-series models to OpenAI.
/// Returns `None` for unrecognized names so callers can fail with a clear
/// error instead of guessing.
pub fn provider_for_model(model: &str) -> Option<Provider> {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude") {
        return Some(Provider::Anthropic);
    }
    if m.starts_with("gpt-")
        || m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
    {
        return Some(Provider::OpenAi);
    }
    None
}

pub fn mini_model_for(provider: Provider) -> &'static str {
    MINI_MODELS
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, m)| *m)
        .expect("every provider has a mini model")
}

/// GPT-5 family models need request shaping of their own: temperature is
/// fixed to 1, reasoning effort rides in the body, and the output cap is
/// `max_completion_tokens` instead of `max_tokens`.
pub fn is_gpt5_family(model: &str) -> bool {
    model.to_ascii_lowercase().starts_with("gpt-5")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
