// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! LLM stream adapter: translates a provider-agnostic chat request into a
//! strongly-typed chunk stream.
//!
//! Two provider dialects are supported (Anthropic-style and OpenAI-style);
//! everything downstream of this crate sees only the unified [`StreamChunk`]
//! enum.  The per-family request shaping lives entirely in the provider
//! modules.
mod anthropic;
mod catalog;
mod chunks;
mod context;
mod mock;
mod openai;
mod provider;
mod sse;

pub use anthropic::AnthropicProvider;
pub use catalog::{is_gpt5_family, provider_for_model, Operation, Provider, MINI_MODELS};
pub use chunks::*;
pub use context::{ApiKeys, ContextService, TaskModelContext};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use provider::{provider_for_context, ChunkStream, Completion, StreamProvider};
