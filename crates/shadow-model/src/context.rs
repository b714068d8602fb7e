// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{mini_model_for, provider_for_model, Operation, Provider};

/// API keys available to a task, one per provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

impl ApiKeys {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Anthropic => self.anthropic.as_deref(),
            Provider::OpenAi => self.openai.as_deref(),
        }
    }
}

/// Task-scoped model selection.
///
/// Immutable for the life of a stream: a new model choice constructs a new
/// context rather than mutating this one.
#[derive(Debug, Clone)]
pub struct TaskModelContext {
    task_id: String,
    main_model: String,
    api_keys: ApiKeys,
}

impl TaskModelContext {
    pub fn new(task_id: impl Into<String>, main_model: impl Into<String>, api_keys: ApiKeys) -> Self {
        Self {
            task_id: task_id.into(),
            main_model: main_model.into(),
            api_keys,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn main_model(&self) -> &str {
        &self.main_model
    }

    pub fn api_keys(&self) -> &ApiKeys {
        &self.api_keys
    }

    /// Model selected for an operation: the main model for the agent stream,
    /// the provider's mini model for title/commit/PR generation.
    pub fn model_for(&self, op: Operation) -> &str {
        if op.uses_mini() {
            match provider_for_model(&self.main_model) {
                Some(p) => mini_model_for(p),
                None => &self.main_model,
            }
        } else {
            &self.main_model
        }
    }

    pub fn provider_for(&self, op: Operation) -> anyhow::Result<Provider> {
        let model = self.model_for(op);
        provider_for_model(model)
            .with_context(|| format!("cannot derive provider from model name: {model}"))
    }

    pub fn api_key_for(&self, op: Operation) -> anyhow::Result<&str> {
        let provider = self.provider_for(op)?;
        self.api_keys.get(provider).with_context(|| {
            format!("no {} API key configured for task {}", provider.as_str(), self.task_id)
        })
    }

    /// Check that the operation can run: provider derivable and key present.
    pub fn validate(&self, op: Operation) -> anyhow::Result<()> {
        let provider = self.provider_for(op)?;
        if self.api_keys.get(provider).is_none() {
            bail!(
                "task {} has no API key for provider {}",
                self.task_id,
                provider.as_str()
            );
        }
        Ok(())
    }
}

/// Manufactures and caches [`TaskModelContext`]s per task.
///
/// The cache is process-local with a TTL and never the source of truth —
/// a miss simply rebuilds the context from the task row.
pub struct ContextService {
    cache: DashMap<String, (TaskModelContext, Instant)>,
    ttl: Duration,
}

impl ContextService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Build a fresh context, replacing any cached one for this task.
    pub fn create(
        &self,
        task_id: &str,
        main_model: &str,
        api_keys: ApiKeys,
    ) -> TaskModelContext {
        let ctx = TaskModelContext::new(task_id, main_model, api_keys);
        self.cache
            .insert(task_id.to_string(), (ctx.clone(), Instant::now()));
        debug!(task = %task_id, model = %main_model, "model context created");
        ctx
    }

    /// Cached context for a task, if present and fresh.
    pub fn get(&self, task_id: &str) -> Option<TaskModelContext> {
        let entry = self.cache.get(task_id)?;
        let (ctx, created) = entry.value();
        if created.elapsed() > self.ttl {
            drop(entry);
            self.cache.remove(task_id);
            return None;
        }
        Some(ctx.clone())
    }

    /// Copy the parent's model choice and keys onto a stacked child task.
    pub fn copy_context(&self, new_task_id: &str, parent: &TaskModelContext) -> TaskModelContext {
        self.create(new_task_id, parent.main_model(), parent.api_keys().clone())
    }

    pub fn invalidate(&self, task_id: &str) {
        self.cache.remove(task_id);
    }
}

impl Default for ContextService {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> ApiKeys {
        ApiKeys {
            anthropic: Some("sk-ant".into()),
            openai: Some("sk-oai".into()),
        }
    }

    #[test]
    fn main_model_used_for_agent_stream() {
        let ctx = TaskModelContext::new("t1", "claude-sonnet-4-5", keys());
        assert_eq!(ctx.model_for(Operation::MainAgent), "claude-sonnet-4-5");
    }

    #[test]
    fn mini_model_used_for_side_operations() {
        let ctx = TaskModelContext::new("t1", "claude-sonnet-4-5", keys());
        assert_eq!(ctx.model_for(Operation::CommitMessage), "claude-haiku-4-5");
        assert_eq!(ctx.model_for(Operation::TaskTitle), "claude-haiku-4-5");

        let ctx = TaskModelContext::new("t1", "gpt-5", keys());
        assert_eq!(ctx.model_for(Operation::PrText), "gpt-5-mini");
    }

    #[test]
    fn api_key_follows_the_selected_provider() {
        let ctx = TaskModelContext::new("t1", "claude-sonnet-4-5", keys());
        assert_eq!(ctx.api_key_for(Operation::MainAgent).unwrap(), "sk-ant");
    }

    #[test]
    fn validate_fails_without_key() {
        let ctx = TaskModelContext::new(
            "t1",
            "gpt-5",
            ApiKeys {
                anthropic: Some("sk-ant".into()),
                openai: None,
            },
        );
        assert!(ctx.validate(Operation::MainAgent).is_err());
    }

    #[test]
    fn validate_fails_for_unknown_model() {
        let ctx = TaskModelContext::new("t1", "mystery-model", keys());
        assert!(ctx.validate(Operation::MainAgent).is_err());
    }

    #[test]
    fn service_caches_and_invalidates() {
        let svc = ContextService::new(Duration::from_secs(60));
        svc.create("t1", "claude-sonnet-4-5", keys());
        assert!(svc.get("t1").is_some());
        svc.invalidate("t1");
        assert!(svc.get("t1").is_none());
    }

    #[test]
    fn expired_entries_miss() {
        let svc = ContextService::new(Duration::from_millis(0));
        svc.create("t1", "claude-sonnet-4-5", keys());
        std::thread::sleep(Duration::from_millis(5));
        assert!(svc.get("t1").is_none());
    }

    #[test]
    fn copy_context_carries_model_and_keys_to_child() {
        let svc = ContextService::default();
        let parent = svc.create("parent", "gpt-5", keys());
        let child = svc.copy_context("child", &parent);
        assert_eq!(child.main_model(), "gpt-5");
        assert_eq!(child.task_id(), "child");
        assert!(svc.get("child").is_some());
    }
}
