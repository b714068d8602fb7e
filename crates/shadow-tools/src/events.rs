// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
    pub sequence: i64,
}

/// One terminal-output entry surfaced to the UI while a shell command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEntry {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: TerminalEntryKind,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalEntryKind {
    Command,
    Stdout,
    Stderr,
    System,
}

/// Events emitted by stateful tools back to the owning stream.
///
/// The sender half is injected into tool construction; the kernel drains
/// the receiver and forwards these on the task's event channel.  No
/// module-level globals are involved.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
    Terminal(TerminalEntry),
}

pub type ToolEventSender = tokio::sync::mpsc::UnboundedSender<ToolEvent>;
