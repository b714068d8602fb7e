// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::Value;

use shadow_db::{
    content_from_parts, MessageMeta, MessagePart, MessageRole, Store, TokenUsage, ToolRecord,
    ToolRecordStatus,
};

/// Folds one stream's chunks into the evolving assistant message row.
///
/// The row is allocated lazily on the first content-bearing chunk so an
/// interrupted stream that never produced anything leaves no empty
/// assistant row behind.  Every mutation persists the full part list and
/// recomputes `content` as the concatenation of text parts.
pub struct MessageFold {
    store: Arc<Store>,
    task_id: String,
    model: String,
    message_id: Option<String>,
    meta: MessageMeta,
    /// Index of the text part currently receiving deltas.
    active_text: Option<usize>,
    /// Index of the reasoning part currently receiving deltas; sealing by
    /// signature advances past it.
    active_reasoning: Option<usize>,
}

impl MessageFold {
    pub fn new(store: Arc<Store>, task_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            store,
            task_id: task_id.into(),
            model: model.into(),
            message_id: None,
            meta: MessageMeta::streaming(),
            active_text: None,
            active_reasoning: None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.meta.parts
    }

    pub fn has_row(&self) -> bool {
        self.message_id.is_some()
    }

    /// Allocate the assistant row if this is the first content chunk.
    pub fn ensure_row(&mut self) -> anyhow::Result<String> {
        if let Some(id) = &self.message_id {
            return Ok(id.clone());
        }
        let row = self.store.append_message(
            &self.task_id,
            MessageRole::Assistant,
            "",
            &self.model,
            self.meta.clone(),
        )?;
        self.message_id = Some(row.id.clone());
        Ok(row.id)
    }

    fn persist(&mut self) -> anyhow::Result<()> {
        let id = self.ensure_row()?;
        self.store.update_message(
            &id,
            shadow_db::MessageUpdate {
                content: Some(content_from_parts(&self.meta.parts)),
                meta: Some(self.meta.clone()),
                ..Default::default()
            },
        )
    }

    pub fn text_delta(&mut self, delta: &str) -> anyhow::Result<()> {
        match self.active_text {
            Some(idx) => {
                if let Some(MessagePart::Text { text }) = self.meta.parts.get_mut(idx) {
                    text.push_str(delta);
                }
            }
            None => {
                self.meta.parts.push(MessagePart::text(delta));
                self.active_text = Some(self.meta.parts.len() - 1);
            }
        }
        self.persist()
    }

    pub fn reasoning_delta(&mut self, delta: &str) -> anyhow::Result<()> {
        match self.active_reasoning {
            Some(idx) => {
                if let Some(MessagePart::Reasoning { text, .. }) = self.meta.parts.get_mut(idx) {
                    text.push_str(delta);
                }
            }
            None => {
                self.meta.parts.push(MessagePart::Reasoning {
                    text: delta.to_string(),
                    signature: None,
                });
                self.active_reasoning = Some(self.meta.parts.len() - 1);
            }
        }
        self.persist()
    }

    /// A signature seals the active reasoning part and advances the
    /// counter; later reasoning deltas start a fresh part.
    pub fn seal_reasoning(&mut self, signature: &str) -> anyhow::Result<()> {
        if let Some(idx) = self.active_reasoning.take() {
            if let Some(MessagePart::Reasoning { signature: sig, .. }) =
                self.meta.parts.get_mut(idx)
            {
                *sig = Some(signature.to_string());
            }
        }
        self.persist()
    }

    pub fn redacted_reasoning(&mut self, data: &str) -> anyhow::Result<()> {
        self.break_active();
        self.meta.parts.push(MessagePart::RedactedReasoning {
            data: data.to_string(),
        });
        self.persist()
    }

    pub fn tool_call(&mut self, id: &str, name: &str, args: Value) -> anyhow::Result<()> {
        self.break_active();
        self.meta.parts.push(MessagePart::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args: args.clone(),
        });
        self.meta.tool_records.push(ToolRecord {
            call_id: id.to_string(),
            name: name.to_string(),
            args: args.clone(),
            status: ToolRecordStatus::Running,
            result: None,
        });
        self.store
            .create_tool_message(&self.task_id, id, name, &args)?;
        self.persist()
    }

    pub fn tool_result(
        &mut self,
        id: &str,
        tool_name: &str,
        result: Value,
        is_valid: bool,
    ) -> anyhow::Result<()> {
        self.break_active();
        self.meta.parts.push(MessagePart::ToolResult {
            id: id.to_string(),
            tool_name: tool_name.to_string(),
            result: result.clone(),
            is_valid,
        });
        if let Some(record) = self
            .meta
            .tool_records
            .iter_mut()
            .find(|r| r.call_id == id)
        {
            record.status = ToolRecordStatus::Completed;
            record.result = Some(result.clone());
        }
        let content = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.store
            .complete_tool_message(&self.task_id, id, &content)?;
        self.persist()
    }

    pub fn usage(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        // Buffered only; persisted with the finish record.
        self.meta.usage = Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });
    }

    /// Append a terminal error part and stop streaming.
    pub fn error(&mut self, message: &str, finish_reason: &str) -> anyhow::Result<()> {
        self.break_active();
        self.meta.parts.push(MessagePart::Error {
            message: message.to_string(),
            finish_reason: Some(finish_reason.to_string()),
        });
        self.meta.finish_reason = Some(finish_reason.to_string());
        self.meta.is_streaming = false;
        self.persist()
    }

    /// Mark the message complete.  Always allocates the row so completion
    /// side-effects have a message to bind snapshots to.
    pub fn finalize(&mut self, finish_reason: Option<&str>) -> anyhow::Result<String> {
        let id = self.ensure_row()?;
        self.meta.is_streaming = false;
        if let Some(reason) = finish_reason {
            self.meta.finish_reason = Some(reason.to_string());
        }
        self.active_text = None;
        self.active_reasoning = None;
        self.persist()?;
        Ok(id)
    }

    /// A non-text part interrupts the active text run; a later text delta
    /// starts a new part.  Reasoning keeps its own counter and is only
    /// advanced by a signature or stream end.
    fn break_active(&mut self) {
        self.active_text = None;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use shadow_db::{NewTask, TaskStatus};

    fn fixture() -> (Arc<Store>, String) {
        let store = Arc::new(Store::in_memory().unwrap());
        let task = store
            .create_task(NewTask {
                repo_full_name: "o/r".into(),
                repo_url: "u".into(),
                base_branch: "main".into(),
                shadow_branch: "shadow/x-000000".into(),
                user_id: "u1".into(),
                main_model: "claude-sonnet-4-5".into(),
                title: "t".into(),
            })
            .unwrap();
        (store, task.id)
    }

    #[test]
    fn row_is_allocated_lazily() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        assert!(!fold.has_row());
        fold.text_delta("hello").unwrap();
        assert!(fold.has_row());
        let history = store.history(&task_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::Assistant);
    }

    #[test]
    fn content_tracks_concatenated_text_parts() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        fold.text_delta("Hello, ").unwrap();
        fold.text_delta("world").unwrap();
        fold.tool_call("c1", "grep_search", json!({"pattern": "x"}))
            .unwrap();
        fold.tool_result("c1", "grep_search", json!({"success": true, "message": "ok"}), true)
            .unwrap();
        fold.text_delta("!").unwrap();
        let msg = &store.history(&task_id).unwrap()[0];
        assert_eq!(msg.content, "Hello, world!");
        // Two text parts: the tool call broke the first run.
        let texts = msg
            .meta
            .parts
            .iter()
            .filter(|p| matches!(p, MessagePart::Text { .. }))
            .count();
        assert_eq!(texts, 2);
    }

    #[test]
    fn signature_seals_and_advances_reasoning() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        fold.reasoning_delta("first ").unwrap();
        fold.reasoning_delta("thought").unwrap();
        fold.seal_reasoning("sig-1").unwrap();
        fold.reasoning_delta("second thought").unwrap();
        let msg = &store.history(&task_id).unwrap()[0];
        match &msg.meta.parts[0] {
            MessagePart::Reasoning { text, signature } => {
                assert_eq!(text, "first thought");
                assert_eq!(signature.as_deref(), Some("sig-1"));
            }
            other => panic!("unexpected part {other:?}"),
        }
        match &msg.meta.parts[1] {
            MessagePart::Reasoning { text, signature } => {
                assert_eq!(text, "second thought");
                assert!(signature.is_none());
            }
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn unsigned_reasoning_survives_finalize() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        fold.reasoning_delta("never signed").unwrap();
        fold.finalize(Some("stop")).unwrap();
        let msg = &store.history(&task_id).unwrap()[0];
        match &msg.meta.parts[0] {
            MessagePart::Reasoning { text, signature } => {
                assert_eq!(text, "never signed");
                assert!(signature.is_none());
            }
            other => panic!("unexpected part {other:?}"),
        }
        assert!(!msg.meta.is_streaming);
    }

    #[test]
    fn tool_lifecycle_mirrors_into_tool_rows() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        fold.tool_call("c1", "read_file", json!({"path": "a"})).unwrap();
        let rows = store.tool_messages(&task_id).unwrap();
        assert_eq!(rows[0].status, ToolRecordStatus::Running);

        fold.tool_result(
            "c1",
            "read_file",
            json!({"success": true, "message": "ok"}),
            true,
        )
        .unwrap();
        let rows = store.tool_messages(&task_id).unwrap();
        assert_eq!(rows[0].status, ToolRecordStatus::Completed);

        let msg = &store.history(&task_id).unwrap()[0];
        assert_eq!(msg.meta.tool_records.len(), 1);
        assert_eq!(msg.meta.tool_records[0].status, ToolRecordStatus::Completed);
        assert!(msg.meta.parts_are_consistent());
    }

    #[test]
    fn error_part_is_terminal_and_stops_streaming() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        fold.text_delta("partial").unwrap();
        fold.error("provider exploded", "error").unwrap();
        let msg = &store.history(&task_id).unwrap()[0];
        assert!(!msg.meta.is_streaming);
        assert!(msg.meta.parts.last().unwrap().is_error());
        assert_eq!(msg.meta.finish_reason.as_deref(), Some("error"));
    }

    #[test]
    fn finalize_allocates_even_for_empty_stream() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        let id = fold.finalize(Some("stop")).unwrap();
        let msg = store.get_message(&id).unwrap().unwrap();
        assert_eq!(msg.content, "");
        assert!(!msg.meta.is_streaming);
        // Fixture task status untouched by the fold.
        assert_eq!(
            store.get_task(&task_id).unwrap().unwrap().status,
            TaskStatus::Initializing
        );
    }

    #[test]
    fn usage_is_buffered_until_finalize() {
        let (store, task_id) = fixture();
        let mut fold = MessageFold::new(store.clone(), &task_id, "m");
        fold.text_delta("x").unwrap();
        fold.usage(100, 20);
        fold.finalize(Some("stop")).unwrap();
        let msg = &store.history(&task_id).unwrap()[0];
        assert_eq!(msg.meta.usage.as_ref().unwrap().total_tokens, 120);
    }
}
