// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element of an assistant message's structured part list.
///
/// Parts are ordered; the message's plain `content` column is always the
/// concatenation of the `Text` parts, recomputed on every update.  A
/// `ToolResult` always follows the `ToolCall` with the same id, and `Error`
/// is terminal within a part list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Provider-redacted reasoning: opaque bytes, round-tripped verbatim.
    RedactedReasoning {
        data: String,
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
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns `true` for the `Error` variant (terminal within a part list).
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Concatenate all `Text` parts in order — the backing value of the
/// assistant message's `content` column.
pub fn content_from_parts(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Denormalized token counts carried on the message row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Mirror record for a single tool call, stored inside message metadata so
/// downstream consumers that prefer per-tool rows can read them without
/// joining the part list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    pub status: ToolRecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolRecordStatus {
    Running,
    Completed,
}

/// Structured metadata column of a chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_records: Vec<ToolRecord>,
}

impl MessageMeta {
    pub fn streaming() -> Self {
        Self {
            is_streaming: true,
            ..Default::default()
        }
    }

    /// Validate the part-list invariants: every tool result matches an
    /// earlier tool call, and nothing follows an error part.
    pub fn parts_are_consistent(&self) -> bool {
        let mut seen_calls: Vec<&str> = Vec::new();
        let mut after_error = false;
        for part in &self.parts {
            if after_error {
                return false;
            }
            match part {
                MessagePart::ToolCall { id, .. } => seen_calls.push(id),
                MessagePart::ToolResult { id, .. } => {
                    if !seen_calls.contains(&id.as_str()) {
                        return false;
                    }
                }
                MessagePart::Error { .. } => after_error = true,
                _ => {}
            }
        }
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
