// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use anyhow::{bail, Context};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog::is_gpt5_family,
    provider::{ChunkStream, Completion},
    sse::SseLineBuffer,
    FinishReason, Message, MessageContent, Role, StreamChunk, StreamRequest, ToolCallChunk, Usage,
};

const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_TEMPERATURE: f32 = 0.2;
/// Reasoning effort carried in provider options for the GPT-5 family.
const GPT5_REASONING_EFFORT: &str = "medium";

pub struct OpenAiProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &StreamRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &req.system {
            if !system.is_empty() {
                messages.push(json!({ "role": "system", "content": system }));
            }
        }
        messages.extend(req.messages.iter().map(shape_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        // GPT-5 family: temperature is pinned to 1, reasoning effort rides in
        // the body, and the output cap uses max_completion_tokens.
        if is_gpt5_family(&self.model) {
            body["temperature"] = json!(1);
            body["reasoning_effort"] = json!(GPT5_REASONING_EFFORT);
            body["max_completion_tokens"] = json!(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        } else {
            body["temperature"] = json!(DEFAULT_TEMPERATURE);
            body["max_tokens"] = json!(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
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
            .context("no OpenAI API key configured")?;
        debug!(model = %self.model, "sending openai request");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .context("OpenAI request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("OpenAI error {status}: {text}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl crate::StreamProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
            let mut state = DeltaState::default();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(anyhow::Error::from)?;
                for payload in lines.push(&chunk) {
                    if payload == "[DONE]" {
                        for out in state.finish_if_pending() {
                            yield out;
                        }
                        break 'outer;
                    }
                    let Ok(event) = serde_json::from_str::<Value>(&payload) else {
                        continue;
                    };
                    for out in parse_openai_event(&event, &mut state) {
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
        let v: Value = resp.json().await.context("OpenAI response parse")?;
        let message = &v["choices"][0]["message"];
        let mut out = Completion {
            text: message["content"].as_str().unwrap_or("").to_string(),
            tool_calls: Vec::new(),
        };
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let args_raw = call["function"]["arguments"].as_str().unwrap_or("{}");
                out.tool_calls.push(ToolCallChunk {
                    id: call["id"].as_str().unwrap_or("").to_string(),
                    name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                    args: serde_json::from_str(args_raw)
                        .unwrap_or(Value::Object(Default::default())),
                });
            }
        }
        Ok(out)
    }
}

// ── Wire shaping ──────────────────────────────────────────────────────────────

fn shape_message(msg: &Message) -> Value {
    match (&msg.role, &msg.content) {
        (_, MessageContent::ToolCall { id, name, args }) => json!({
            "role": "assistant",
            "tool_calls": [{
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": args.to_string() },
            }],
        }),
        (_, MessageContent::ToolResult { id, content }) => json!({
            "role": "tool",
            "tool_call_id": id,
            "content": match content {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }),
        (role, MessageContent::Text(t)) => json!({
            "role": match role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            "content": t,
        }),
    }
}

// ── Event parsing ─────────────────────────────────────────────────────────────

/// Tool-call accumulation across deltas.  OpenAI interleaves chunks for
/// parallel tool calls by index; a BTreeMap keeps flush order stable.
#[derive(Debug, Default)]
struct DeltaState {
    pending: BTreeMap<u64, PendingTool>,
    finish: Option<FinishReason>,
    finished: bool,
}

#[derive(Debug, Default)]
struct PendingTool {
    id: String,
    name: String,
    args_buf: String,
    started: bool,
}

impl DeltaState {
    /// Flush accumulated tool calls followed by the finish chunk.
    fn flush_finish(&mut self, reason: FinishReason) -> Vec<StreamChunk> {
        let mut out: Vec<StreamChunk> = Vec::new();
        for (_, p) in std::mem::take(&mut self.pending) {
            if p.name.is_empty() {
                continue;
            }
            let args = if p.args_buf.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&p.args_buf).unwrap_or(Value::Object(Default::default()))
            };
            out.push(StreamChunk::ToolCall(ToolCallChunk {
                id: p.id,
                name: p.name,
                args,
            }));
        }
        self.finished = true;
        out.push(StreamChunk::Finish(reason));
        out
    }

    /// Emit the finish chunk at `[DONE]` when the provider never sent a
    /// finish_reason (some compat servers omit it).
    fn finish_if_pending(&mut self) -> Vec<StreamChunk> {
        if self.finished {
            return vec![];
        }
        let reason = self.finish.unwrap_or(FinishReason::Stop);
        self.flush_finish(reason)
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "tool_calls" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_openai_event(v: &Value, state: &mut DeltaState) -> Vec<StreamChunk> {
    let mut out = Vec::new();

    // The final usage-only chunk has an empty choices array.
    if let (Some(prompt), Some(completion)) = (
        v["usage"]["prompt_tokens"].as_u64(),
        v["usage"]["completion_tokens"].as_u64(),
    ) {
        out.push(StreamChunk::Usage(Usage {
            prompt_tokens: prompt as u32,
            completion_tokens: completion as u32,
        }));
    }

    let Some(choice) = v["choices"].get(0) else {
        return out;
    };
    let delta = &choice["delta"];

    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            out.push(StreamChunk::TextDelta(text.to_string()));
        }
    }
    // Reasoning-capable compat servers stream thinking separately.
    if let Some(thinking) = delta["reasoning_content"].as_str() {
        if !thinking.is_empty() {
            out.push(StreamChunk::Reasoning(thinking.to_string()));
        }
    }
    if let Some(calls) = delta["tool_calls"].as_array() {
        for call in calls {
            let index = call["index"].as_u64().unwrap_or(0);
            let p = state.pending.entry(index).or_default();
            if let Some(id) = call["id"].as_str() {
                if !id.is_empty() {
                    p.id = id.to_string();
                }
            }
            if let Some(name) = call["function"]["name"].as_str() {
                if !name.is_empty() {
                    p.name = name.to_string();
                }
            }
            if !p.started && !p.id.is_empty() && !p.name.is_empty() {
                p.started = true;
                out.push(StreamChunk::ToolCallStart {
                    id: p.id.clone(),
                    name: p.name.clone(),
                });
            }
            if let Some(args) = call["function"]["arguments"].as_str() {
                if !args.is_empty() {
                    p.args_buf.push_str(args);
                    out.push(StreamChunk::ToolCallDelta {
                        id: p.id.clone(),
                        args_delta: args.to_string(),
                    });
                }
            }
        }
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        let mapped = map_finish_reason(reason);
        state.finish = Some(mapped);
        out.extend(state.flush_finish(mapped));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse_all(events: &[Value]) -> Vec<StreamChunk> {
        let mut state = DeltaState::default();
        events
            .iter()
            .flat_map(|e| parse_openai_event(e, &mut state))
            .collect()
    }

    #[test]
    fn content_deltas_become_text_chunks() {
        let chunks = parse_all(&[
            json!({"choices": [{"delta": {"content": "hi"}}]}),
            json!({"choices": [{"delta": {"content": " there"}}]}),
        ]);
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta("hi".into()),
                StreamChunk::TextDelta(" there".into())
            ]
        );
    }

    #[test]
    fn tool_call_deltas_accumulate_until_finish() {
        let chunks = parse_all(&[
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "edit_file", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"path\":\"a\"}"}}
            ]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        assert_eq!(
            chunks[0],
            StreamChunk::ToolCallStart {
                id: "call_1".into(),
                name: "edit_file".into()
            }
        );
        assert!(matches!(chunks[1], StreamChunk::ToolCallDelta { .. }));
        assert_eq!(
            chunks[2],
            StreamChunk::ToolCall(ToolCallChunk {
                id: "call_1".into(),
                name: "edit_file".into(),
                args: json!({"path": "a"}),
            })
        );
        assert_eq!(chunks[3], StreamChunk::Finish(FinishReason::ToolCalls));
    }

    #[test]
    fn usage_chunk_parses_from_final_event() {
        let chunks = parse_all(&[json!({
            "choices": [],
            "usage": {"prompt_tokens": 200, "completion_tokens": 50}
        })]);
        assert_eq!(
            chunks,
            vec![StreamChunk::Usage(Usage {
                prompt_tokens: 200,
                completion_tokens: 50
            })]
        );
    }

    #[test]
    fn stop_finish_reason_maps_to_stop() {
        let chunks = parse_all(&[json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})]);
        assert_eq!(chunks, vec![StreamChunk::Finish(FinishReason::Stop)]);
    }

    #[test]
    fn done_without_finish_reason_still_finishes() {
        let mut state = DeltaState::default();
        parse_openai_event(&json!({"choices": [{"delta": {"content": "x"}}]}), &mut state);
        let flushed = state.finish_if_pending();
        assert_eq!(flushed, vec![StreamChunk::Finish(FinishReason::Stop)]);
        // A second flush is a no-op.
        assert!(state.finish_if_pending().is_empty());
    }

    #[test]
    fn reasoning_content_maps_to_reasoning_chunk() {
        let chunks = parse_all(&[json!({
            "choices": [{"delta": {"reasoning_content": "let me think"}}]
        })]);
        assert_eq!(chunks, vec![StreamChunk::Reasoning("let me think".into())]);
    }

    // ── Request shaping ───────────────────────────────────────────────────────

    #[test]
    fn gpt5_family_gets_pinned_temperature_and_completion_cap() {
        let p = OpenAiProvider::new("gpt-5".into(), Some("k".into()), None);
        let req = StreamRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = p.build_body(&req, true);
        assert_eq!(body["temperature"], 1);
        assert_eq!(body["reasoning_effort"], "medium");
        assert!(body["max_completion_tokens"].is_number());
        assert!(body["max_tokens"].is_null());
    }

    #[test]
    fn older_models_keep_max_tokens() {
        let p = OpenAiProvider::new("gpt-4.1".into(), Some("k".into()), None);
        let req = StreamRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = p.build_body(&req, false);
        assert!(body["max_tokens"].is_number());
        assert!(body["max_completion_tokens"].is_null());
        assert!(body["stream"].is_null());
    }

    #[test]
    fn tool_result_messages_shape_with_call_id() {
        let shaped = shape_message(&Message::tool_result("call_9", json!({"ok": true})));
        assert_eq!(shaped["role"], "tool");
        assert_eq!(shaped["tool_call_id"], "call_9");
    }

    #[test]
    fn tool_call_messages_carry_stringified_arguments() {
        let shaped = shape_message(&Message::tool_call("c", "grep", json!({"p": 1})));
        assert_eq!(shaped["tool_calls"][0]["function"]["name"], "grep");
        assert_eq!(
            shaped["tool_calls"][0]["function"]["arguments"],
            "{\"p\":1}"
        );
    }
}
