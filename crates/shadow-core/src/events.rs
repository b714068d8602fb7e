// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use shadow_tools::{TerminalEntry, TodoItem};

/// One event on a task's UI channel.
///
/// This is the chunk wire protocol: every kind maps 1:1 to an event the
/// frontend renders while a stream is in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskEvent {
    Content {
        delta: String,
    },
    Reasoning {
        delta: String,
    },
    ReasoningSignature {
        signature: String,
    },
    RedactedReasoning {
        data: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        args_delta: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        tool_name: String,
        result: Value,
        is_valid: bool,
    },
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    Complete {
        finish_reason: String,
    },
    Error {
        message: String,
    },
    TodoUpdate {
        todos: Vec<TodoItem>,
    },
    TerminalOutput {
        entry: TerminalEntry,
    },
}

const CHANNEL_CAPACITY: usize = 256;

/// Task-scoped broadcast channels.
///
/// Senders are created on first use; a task with no subscribers drops
/// events on the floor, which is the correct behavior for a headless run.
#[derive(Default)]
pub struct EventBus {
    channels: DashMap<String, broadcast::Sender<TaskEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        self.channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn emit(&self, task_id: &str, event: TaskEvent) {
        if let Some(sender) = self.channels.get(task_id) {
            // No receivers is fine; the stream result is persisted anyway.
            let _ = sender.send(event);
        }
    }

    /// Drop the channel when a task is cleaned up.
    pub fn forget(&self, task_id: &str) {
        self.channels.remove(task_id);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
