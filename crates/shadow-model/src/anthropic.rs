// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use anyhow::{bail, Context};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    provider::{ChunkStream, Completion},
    sse::SseLineBuffer,
    FinishReason, Message, MessageContent, Role, StreamChunk, StreamRequest, ToolCallChunk, Usage,
};

const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Extended-thinking budget advertised in provider options.
const THINKING_BUDGET_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Interleaved thinking lets the model reason between tool calls.
const BETA_INTERLEAVED_THINKING: &str = "interleaved-thinking-2025-05-14";

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &StreamRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": build_anthropic_messages(&req.messages),
            "stream": stream,
            "thinking": {
                "type": "enabled",
                "budget_tokens": THINKING_BUDGET_TOKENS,
            },
        });
        // System prompt as a dedicated block with an ephemeral cache-control
        // marker so the prefix is cached across turns.
        if let Some(system) = &req.system {
            if !system.is_empty() {
                body["system"] = json!([{
                    "type": "text",
                    "text": system,
                    "cache_control": { "type": "ephemeral" },
                }]);
            }
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    async fn send(&self, body: &Value) -> anyhow::Result<reqwest::Response> {
        let key = self
            .api_key
            .as_deref()
            .context("no Anthropic API key configured")?;
        debug!(model = %self.model, "sending anthropic request");
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", BETA_INTERLEAVED_THINKING)
            .json(body)
            .send()
            .await
            .context("Anthropic request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Anthropic error {status}: {text}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl crate::StreamProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: StreamRequest) -> anyhow::Result<ChunkStream> {
        let body = self.build_body(&req, true);
        let resp = self.send(&body).await?;
        let mut bytes = resp.bytes_stream();

        let stream = try_stream! {
            let mut lines = SseLineBuffer::new();
            let mut state = EventState::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(anyhow::Error::from)?;
                for payload in lines.push(&chunk) {
                    let Ok(event) = serde_json::from_str::<Value>(&payload) else {
                        continue;
                    };
                    for out in parse_anthropic_event(&event, &mut state) {
                        yield out;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn complete_once(&self, req: StreamRequest) -> anyhow::Result<Completion> {
        let body = self.build_body(&req, false);
        let resp = self.send(&body).await?;
        let v: Value = resp.json().await.context("Anthropic response parse")?;
        let mut out = Completion::default();
        if let Some(blocks) = v["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or("") {
                    "text" => out.text.push_str(block["text"].as_str().unwrap_or("")),
                    "tool_use" => out.tool_calls.push(ToolCallChunk {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        args: block["input"].clone(),
                    }),
                    _ => {}
                }
            }
        }
        Ok(out)
    }
}

// ── Wire shaping ──────────────────────────────────────────────────────────────

/// Convert the neutral history into Anthropic's messages array.
///
/// Tool results become `tool_result` blocks in a user message; consecutive
/// same-role entries are merged into one content array because the API
/// requires strict role alternation.
fn build_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for msg in messages {
        let (role, block) = match (&msg.role, &msg.content) {
            // System/tool text in the history folds into user turns; the
            // real system prompt travels in the top-level field.
            (Role::System | Role::User | Role::Tool, MessageContent::Text(t)) => {
                ("user", json!({ "type": "text", "text": t }))
            }
            (Role::Assistant, MessageContent::Text(t)) => {
                ("assistant", json!({ "type": "text", "text": t }))
            }
            (_, MessageContent::ToolCall { id, name, args }) => (
                "assistant",
                json!({ "type": "tool_use", "id": id, "name": name, "input": args }),
            ),
            (_, MessageContent::ToolResult { id, content }) => (
                "user",
                json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": stringify_result(content),
                }),
            ),
        };
        match out.last_mut() {
            Some(prev) if prev["role"] == role => {
                prev["content"].as_array_mut().unwrap().push(block);
            }
            _ => out.push(json!({ "role": role, "content": [block] })),
        }
    }
    out
}

fn stringify_result(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Event parsing ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct EventState {
    /// Pending tool-use blocks keyed by content-block index.
    pending: HashMap<u64, PendingTool>,
    input_tokens: u32,
    finish: Option<FinishReason>,
}

#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    args_buf: String,
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Translate one Anthropic SSE event into zero or more chunks.
fn parse_anthropic_event(v: &Value, state: &mut EventState) -> Vec<StreamChunk> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            state.input_tokens = v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            vec![]
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let block = &v["content_block"];
            match block["type"].as_str().unwrap_or("") {
                "tool_use" => {
                    let id = block["id"].as_str().unwrap_or("").to_string();
                    let name = block["name"].as_str().unwrap_or("").to_string();
                    state.pending.insert(
                        index,
                        PendingTool {
                            id: id.clone(),
                            name: name.clone(),
                            args_buf: String::new(),
                        },
                    );
                    vec![StreamChunk::ToolCallStart { id, name }]
                }
                "redacted_thinking" => {
                    let data = block["data"].as_str().unwrap_or("").to_string();
                    vec![StreamChunk::RedactedReasoning(data)]
                }
                _ => vec![],
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    vec![StreamChunk::TextDelta(
                        delta["text"].as_str().unwrap_or("").to_string(),
                    )]
                }
                "thinking_delta" => {
                    vec![StreamChunk::Reasoning(
                        delta["thinking"].as_str().unwrap_or("").to_string(),
                    )]
                }
                "signature_delta" => {
                    vec![StreamChunk::ReasoningSignature(
                        delta["signature"].as_str().unwrap_or("").to_string(),
                    )]
                }
                "input_json_delta" => {
                    let partial = delta["partial_json"].as_str().unwrap_or("").to_string();
                    if let Some(p) = state.pending.get_mut(&index) {
                        p.args_buf.push_str(&partial);
                        vec![StreamChunk::ToolCallDelta {
                            id: p.id.clone(),
                            args_delta: partial,
                        }]
                    } else {
                        vec![]
                    }
                }
                _ => vec![],
            }
        }
        "content_block_stop" => {
            let index = v["index"].as_u64().unwrap_or(0);
            match state.pending.remove(&index) {
                Some(p) => {
                    // Empty argument buffers resolve to {} — the API requires
                    // tool_use input to be an object.
                    let args = if p.args_buf.is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&p.args_buf)
                            .unwrap_or(Value::Object(Default::default()))
                    };
                    vec![StreamChunk::ToolCall(ToolCallChunk {
                        id: p.id,
                        name: p.name,
                        args,
                    })]
                }
                None => vec![],
            }
        }
        "message_delta" => {
            let mut out = Vec::new();
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                state.finish = Some(map_stop_reason(reason));
            }
            if let Some(output) = v["usage"]["output_tokens"].as_u64() {
                out.push(StreamChunk::Usage(Usage {
                    prompt_tokens: state.input_tokens,
                    completion_tokens: output as u32,
                }));
            }
            out
        }
        "message_stop" => {
            vec![StreamChunk::Finish(
                state.finish.unwrap_or(FinishReason::Stop),
            )]
        }
        "error" => {
            let msg = v["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error")
                .to_string();
            vec![StreamChunk::Error(msg)]
        }
        _ => vec![],
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ToolSchema;

    fn parse_all(events: &[Value]) -> Vec<StreamChunk> {
        let mut state = EventState::default();
        events
            .iter()
            .flat_map(|e| parse_anthropic_event(e, &mut state))
            .collect()
    }

    #[test]
    fn text_deltas_flow_through() {
        let chunks = parse_all(&[
            json!({"type": "content_block_start", "index": 0,
                   "content_block": {"type": "text"}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": "hel"}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": "lo"}}),
        ]);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta("hel".into()),
                StreamChunk::TextDelta("lo".into())
            ]
        );
    }

    #[test]
    fn thinking_and_signature_map_to_reasoning_chunks() {
        let chunks = parse_all(&[
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "signature_delta", "signature": "sig=="}}),
        ]);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Reasoning("hmm".into()),
                StreamChunk::ReasoningSignature("sig==".into())
            ]
        );
    }

    #[test]
    fn redacted_thinking_forwards_opaque_data() {
        let chunks = parse_all(&[json!({
            "type": "content_block_start", "index": 0,
            "content_block": {"type": "redacted_thinking", "data": "AAAA"}
        })]);
        assert_eq!(chunks, vec![StreamChunk::RedactedReasoning("AAAA".into())]);
    }

    #[test]
    fn tool_use_accumulates_and_completes() {
        let chunks = parse_all(&[
            json!({"type": "content_block_start", "index": 1,
                   "content_block": {"type": "tool_use", "id": "tc1", "name": "edit_file"}}),
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"path\":"}}),
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "input_json_delta", "partial_json": "\"a.rs\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
        ]);
        assert_eq!(
            chunks[0],
            StreamChunk::ToolCallStart {
                id: "tc1".into(),
                name: "edit_file".into()
            }
        );
        assert!(matches!(chunks[1], StreamChunk::ToolCallDelta { .. }));
        assert_eq!(
            chunks[3],
            StreamChunk::ToolCall(ToolCallChunk {
                id: "tc1".into(),
                name: "edit_file".into(),
                args: json!({"path": "a.rs"}),
            })
        );
    }

    #[test]
    fn empty_tool_args_resolve_to_object() {
        let chunks = parse_all(&[
            json!({"type": "content_block_start", "index": 0,
                   "content_block": {"type": "tool_use", "id": "t", "name": "list"}}),
            json!({"type": "content_block_stop", "index": 0}),
        ]);
        match &chunks[1] {
            StreamChunk::ToolCall(tc) => assert_eq!(tc.args, json!({})),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn usage_combines_input_and_output_tokens() {
        let chunks = parse_all(&[
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 120}}}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
                   "usage": {"output_tokens": 30}}),
            json!({"type": "message_stop"}),
        ]);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Usage(Usage {
                    prompt_tokens: 120,
                    completion_tokens: 30
                }),
                StreamChunk::Finish(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn tool_use_stop_reason_maps_to_tool_calls_finish() {
        let chunks = parse_all(&[
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {}}),
            json!({"type": "message_stop"}),
        ]);
        assert_eq!(chunks, vec![StreamChunk::Finish(FinishReason::ToolCalls)]);
    }

    #[test]
    fn error_event_becomes_error_chunk() {
        let chunks = parse_all(&[json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })]);
        assert_eq!(chunks, vec![StreamChunk::Error("Overloaded".into())]);
    }

    // ── Request shaping ───────────────────────────────────────────────────────

    #[test]
    fn system_prompt_gets_cache_control_block() {
        let p = AnthropicProvider::new("claude-sonnet-4-5".into(), Some("k".into()), None);
        let req = StreamRequest {
            system: Some("be helpful".into()),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = p.build_body(&req, true);
        assert_eq!(body["system"][0]["type"], "text");
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["thinking"]["type"], "enabled");
    }

    #[test]
    fn tools_are_shaped_with_input_schema() {
        let p = AnthropicProvider::new("claude-sonnet-4-5".into(), Some("k".into()), None);
        let req = StreamRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolSchema {
                name: "grep".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let body = p.build_body(&req, true);
        assert_eq!(body["tools"][0]["name"], "grep");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn history_merges_consecutive_same_role_blocks() {
        let msgs = vec![
            Message::user("question"),
            Message::tool_call("c1", "grep", json!({"pattern": "x"})),
            Message::tool_result("c1", json!({"matches": []})),
            Message::user("follow-up"),
        ];
        let shaped = build_anthropic_messages(&msgs);
        // user(question) / assistant(tool_use) / user(tool_result + follow-up)
        assert_eq!(shaped.len(), 3);
        assert_eq!(shaped[1]["content"][0]["type"], "tool_use");
        assert_eq!(shaped[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(shaped[2]["content"][0]["type"], "tool_result");
    }
}
