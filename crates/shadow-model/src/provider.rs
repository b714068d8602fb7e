// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::{
    catalog::{Operation, Provider},
    context::TaskModelContext,
    AnthropicProvider, OpenAiProvider, StreamChunk, StreamRequest, ToolCallChunk,
};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The result of a one-shot (non-streaming) completion.  Used by the
/// tool-argument repair path and the mini-model text generators.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCallChunk>,
}

#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Provider id for status display (`"anthropic"`, `"openai"`).
    fn name(&self) -> &str;

    /// Model identifier forwarded to the API.
    fn model_name(&self) -> &str;

    /// Open a streaming completion and return the typed chunk stream.
    async fn stream(&self, req: StreamRequest) -> anyhow::Result<ChunkStream>;

    /// One-shot non-streaming completion.
    async fn complete_once(&self, req: StreamRequest) -> anyhow::Result<Completion>;
}

/// Construct the provider selected by a task context for the given
/// operation (main model or the cost-optimized mini).
pub fn provider_for_context(
    ctx: &TaskModelContext,
    op: Operation,
) -> anyhow::Result<Arc<dyn StreamProvider>> {
    let model = ctx.model_for(op).to_string();
    let key = ctx.api_key_for(op)?.to_string();
    Ok(match ctx.provider_for(op)? {
        Provider::Anthropic => Arc::new(AnthropicProvider::new(model, Some(key), None)),
        Provider::OpenAi => Arc::new(OpenAiProvider::new(model, Some(key), None)),
    })
}
