// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecOutcome, TodoItem, Tool, ToolCall, ToolEvent, ToolEventSender};

/// Where todo lists are persisted.
///
/// The kernel implements this over the task store and injects it into tool
/// construction; the tool never reaches for storage directly.
pub trait TodoSink: Send + Sync {
    /// Replace (or merge into) the task's todo list atomically.  Returns
    /// the full list after the write.
    fn write(&self, items: Vec<TodoItem>, merge: bool) -> anyhow::Result<Vec<TodoItem>>;
}

pub struct TodoWriteTool {
    sink: Arc<dyn TodoSink>,
    events: ToolEventSender,
}

impl TodoWriteTool {
    pub fn new(sink: Arc<dyn TodoSink>, events: ToolEventSender) -> Self {
        Self { sink, events }
    }
}

const VALID_STATUSES: &[&str] = &["pending", "in_progress", "completed", "cancelled"];

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create or update the task's todo list. With merge=false the list is \
         replaced; with merge=true items are updated by id and the rest kept."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": VALID_STATUSES,
                            }
                        },
                        "required": ["id", "content", "status"]
                    }
                },
                "merge": {
                    "type": "boolean",
                    "description": "Merge by id instead of replacing (default false)"
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let Some(raw) = call.args.get("todos").and_then(|v| v.as_array()) else {
            return ExecOutcome::<()>::err("missing required parameter 'todos'").to_value();
        };
        let merge = call
            .args
            .get("merge")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut items = Vec::with_capacity(raw.len());
        for (i, entry) in raw.iter().enumerate() {
            let id = entry.get("id").and_then(|v| v.as_str());
            let content = entry.get("content").and_then(|v| v.as_str());
            let status = entry.get("status").and_then(|v| v.as_str());
            let (Some(id), Some(content), Some(status)) = (id, content, status) else {
                return ExecOutcome::<()>::err(format!(
                    "todo #{i} is missing id, content, or status"
                ))
                .to_value();
            };
            if !VALID_STATUSES.contains(&status) {
                return ExecOutcome::<()>::err(format!(
                    "todo #{i} has invalid status '{status}'"
                ))
                .to_value();
            }
            items.push(TodoItem {
                id: id.to_string(),
                content: content.to_string(),
                status: status.to_string(),
                sequence: (i + 1) as i64,
            });
        }

        match self.sink.write(items, merge) {
            Ok(all) => {
                let _ = self.events.send(ToolEvent::TodoUpdate(all.clone()));
                ExecOutcome::ok(all, "todos updated").to_value()
            }
            Err(e) => ExecOutcome::<()>::err(format!("todo write failed: {e}")).to_value(),
        }
    }
}
