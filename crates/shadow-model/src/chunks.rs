// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Request types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of the provider-facing conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                id: id.into(),
                name: name.into(),
                args,
            },
        }
    }

    pub fn tool_result(id: impl Into<String>, content: Value) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                id: id.into(),
                content,
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCall { id: String, name: String, args: Value },
    ToolResult { id: String, content: Value },
}

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Request sent to a stream provider.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// System prompt.  Anthropic carries this as a dedicated first block with
    /// an ephemeral cache-control marker; OpenAI-style providers prepend it
    /// as a system message.
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
}

// ─── Chunk types ──────────────────────────────────────────────────────────────

/// One strongly-typed chunk of a provider stream.
///
/// The adapter multiplexes every provider event into this enum; the fold in
/// the kernel consumes nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta(String),
    /// A reasoning/thinking delta.
    Reasoning(String),
    /// Seals the active reasoning part.
    ReasoningSignature(String),
    /// Provider-redacted reasoning; opaque bytes forwarded verbatim.
    RedactedReasoning(String),
    /// A tool call has started streaming; arguments follow as deltas.
    ToolCallStart { id: String, name: String },
    /// A fragment of the active tool call's JSON arguments.
    ToolCallDelta { id: String, args_delta: String },
    /// A complete tool call with parsed arguments.
    ToolCall(ToolCallChunk),
    Usage(Usage),
    Finish(FinishReason),
    /// A provider-reported error; terminal.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool-calls",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::Error => "error",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool_result("id", json!("ok")).role, Role::Tool);
        assert_eq!(
            Message::tool_call("id", "grep", json!({})).role,
            Role::Assistant
        );
    }

    #[test]
    fn as_text_only_for_text_content() {
        assert_eq!(Message::user("hello").as_text(), Some("hello"));
        assert!(Message::tool_result("id", json!("x")).as_text().is_none());
    }

    #[test]
    fn usage_total_sums_both_sides() {
        let u = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        assert_eq!(u.total(), 15);
    }

    #[test]
    fn finish_reason_serializes_kebab_case() {
        let v = serde_json::to_value(FinishReason::ToolCalls).unwrap();
        assert_eq!(v, "tool-calls");
        assert_eq!(FinishReason::ToolCalls.as_str(), "tool-calls");
    }
}
