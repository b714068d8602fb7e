// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{
    TerminalEntry, TerminalEntryKind, Tool, ToolCall, ToolEvent, ToolEventSender,
    WorkspaceExecutor, DEFAULT_COMMAND_TIMEOUT_SECS,
};

pub struct RunCommandTool {
    executor: Arc<dyn WorkspaceExecutor>,
    events: ToolEventSender,
    entry_counter: AtomicU64,
}

impl RunCommandTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>, events: ToolEventSender) -> Self {
        Self {
            executor,
            events,
            entry_counter: AtomicU64::new(1),
        }
    }

    fn emit(&self, kind: TerminalEntryKind, data: impl Into<String>) {
        let entry = TerminalEntry {
            id: self.entry_counter.fetch_add(1, Ordering::Relaxed),
            kind,
            data: data.into(),
        };
        // A closed channel means the stream is gone; nothing to surface to.
        let _ = self.events.send(ToolEvent::Terminal(entry));
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_terminal_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace. Foreground commands time out \
         after 30 seconds by default; set is_background for long-running \
         processes (dev servers, watchers)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "is_background": {
                    "type": "boolean",
                    "description": "Detach and return immediately (default false)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Foreground timeout in seconds (default 30)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let command = match require_str(call, "command") {
            Ok(c) => c,
            Err(v) => return v,
        };
        let background = call
            .args
            .get("is_background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let timeout = call
            .args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .or(Some(DEFAULT_COMMAND_TIMEOUT_SECS));

        self.emit(TerminalEntryKind::Command, command);
        let outcome = self.executor.run_command(command, background, timeout).await;
        if let Some(out) = &outcome.data {
            if !out.stdout.is_empty() {
                self.emit(TerminalEntryKind::Stdout, out.stdout.clone());
            }
            if !out.stderr.is_empty() {
                self.emit(TerminalEntryKind::Stderr, out.stderr.clone());
            }
            if out.background {
                self.emit(TerminalEntryKind::System, "command detached to background");
            }
        } else if let Some(err) = &outcome.error {
            self.emit(TerminalEntryKind::System, err.clone());
        }
        outcome.to_value()
    }
}
