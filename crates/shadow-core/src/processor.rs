// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shadow_db::Store;
use shadow_model::{
    FinishReason, Message, StreamChunk, StreamProvider, StreamRequest, ToolCallChunk,
    ToolSchema as ModelToolSchema,
};
use shadow_tools::{
    is_mcp_tool, validate_args_shape, validate_result_shape, ToolCall, ToolRegistry,
    MCP_RESULT_MAX_BYTES,
};

use crate::{errors::normalize_provider_error, EventBus, MessageFold, TaskEvent};

/// Upper bound on provider round-trips within one user turn.
const MAX_STEPS: usize = 100;

/// Terminal state of one stream run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        message_id: String,
        finish: FinishReason,
    },
    /// Cancelled via stop request or pre-emption; not an error.
    Stopped {
        message_id: Option<String>,
    },
    Errored {
        message_id: Option<String>,
        message: String,
    },
}

/// Inputs for one stream run.
pub struct StreamParams {
    pub task_id: String,
    pub model: String,
    pub provider: Arc<dyn StreamProvider>,
    pub system: Option<String>,
    pub history: Vec<Message>,
    pub cancel: CancellationToken,
    pub enable_tools: bool,
}

/// Drives the stepwise stream: folds chunks into the assistant message,
/// dispatches tool calls between steps, repairs invalid tool arguments,
/// and validates tool-result shapes.
pub struct StreamProcessor {
    store: Arc<Store>,
    registry: Arc<ToolRegistry>,
    events: Arc<EventBus>,
}

impl StreamProcessor {
    pub fn new(store: Arc<Store>, registry: Arc<ToolRegistry>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            registry,
            events,
        }
    }

    fn tool_schemas(&self) -> Vec<ModelToolSchema> {
        self.registry
            .schemas()
            .into_iter()
            .map(|s| ModelToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    pub async fn run(&self, mut params: StreamParams) -> anyhow::Result<StreamOutcome> {
        let mut fold = MessageFold::new(self.store.clone(), &params.task_id, &params.model);
        let tools = if params.enable_tools {
            self.tool_schemas()
        } else {
            Vec::new()
        };
        let mut finish = FinishReason::Stop;

        for step in 0..MAX_STEPS {
            let req = StreamRequest {
                system: params.system.clone(),
                messages: params.history.clone(),
                tools: tools.clone(),
                max_tokens: None,
            };
            let mut stream = match params.provider.stream(req).await {
                Ok(s) => s,
                Err(e) => {
                    let message = normalize_provider_error(&e.to_string());
                    fold.error(&message, "error")?;
                    self.emit(&params.task_id, TaskEvent::Error {
                        message: message.clone(),
                    });
                    return Ok(StreamOutcome::Errored {
                        message_id: fold.message_id().map(String::from),
                        message,
                    });
                }
            };

            let mut step_text = String::new();
            // (call, result) pairs produced this step, in order — fed back
            // into the history before the next provider round-trip.
            let mut step_exchanges: Vec<(ToolCallChunk, Value)> = Vec::new();

            loop {
                // Stop flag checked at every chunk boundary; the select also
                // interrupts a chunk await in flight.
                let chunk = tokio::select! {
                    biased;
                    _ = params.cancel.cancelled() => {
                        debug!(task = %params.task_id, step, "stream cancelled");
                        let message_id = if fold.has_row() {
                            Some(fold.finalize(None)?)
                        } else {
                            None
                        };
                        return Ok(StreamOutcome::Stopped { message_id });
                    }
                    chunk = stream.next() => chunk,
                };
                let Some(chunk) = chunk else {
                    break;
                };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => StreamChunk::Error(e.to_string()),
                };
                match chunk {
                    StreamChunk::TextDelta(delta) => {
                        if delta.is_empty() {
                            continue;
                        }
                        step_text.push_str(&delta);
                        fold.text_delta(&delta)?;
                        self.emit(&params.task_id, TaskEvent::Content { delta });
                    }
                    StreamChunk::Reasoning(delta) => {
                        if delta.is_empty() {
                            continue;
                        }
                        fold.reasoning_delta(&delta)?;
                        self.emit(&params.task_id, TaskEvent::Reasoning { delta });
                    }
                    StreamChunk::ReasoningSignature(signature) => {
                        fold.seal_reasoning(&signature)?;
                        self.emit(&params.task_id, TaskEvent::ReasoningSignature { signature });
                    }
                    StreamChunk::RedactedReasoning(data) => {
                        fold.redacted_reasoning(&data)?;
                        self.emit(&params.task_id, TaskEvent::RedactedReasoning { data });
                    }
                    StreamChunk::ToolCallStart { id, name } => {
                        self.emit(&params.task_id, TaskEvent::ToolCallStart { id, name });
                    }
                    StreamChunk::ToolCallDelta { id, args_delta } => {
                        self.emit(&params.task_id, TaskEvent::ToolCallDelta { id, args_delta });
                    }
                    StreamChunk::ToolCall(call) => {
                        let exchange = self.handle_tool_call(&params, &mut fold, call).await?;
                        step_exchanges.push(exchange);
                    }
                    StreamChunk::Usage(usage) => {
                        fold.usage(usage.prompt_tokens, usage.completion_tokens);
                        self.emit(&params.task_id, TaskEvent::Usage {
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                        });
                    }
                    StreamChunk::Finish(reason) => {
                        finish = reason;
                    }
                    StreamChunk::Error(raw) => {
                        let message = normalize_provider_error(&raw);
                        fold.error(&message, "error")?;
                        self.emit(&params.task_id, TaskEvent::Error {
                            message: message.clone(),
                        });
                        return Ok(StreamOutcome::Errored {
                            message_id: fold.message_id().map(String::from),
                            message,
                        });
                    }
                }
            }

            if step_exchanges.is_empty() {
                break;
            }

            // Feed this step's output back into the history for the next
            // round-trip: assistant text, then each call/result pair.
            if !step_text.is_empty() {
                params.history.push(Message::assistant(&step_text));
            }
            for (call, result) in step_exchanges {
                params
                    .history
                    .push(Message::tool_call(&call.id, &call.name, call.args.clone()));
                params.history.push(Message::tool_result(&call.id, result));
            }
        }

        let message_id = fold.finalize(Some(finish.as_str()))?;
        self.emit(&params.task_id, TaskEvent::Complete {
            finish_reason: finish.as_str().to_string(),
        });
        Ok(StreamOutcome::Completed { message_id, finish })
    }

    /// Apply fold rule 3/4 to one complete tool call: name validation,
    /// argument validation with a one-shot repair, dispatch, result-shape
    /// validation.  Returns the (call, result) pair for the history.
    async fn handle_tool_call(
        &self,
        params: &StreamParams,
        fold: &mut MessageFold,
        call: ToolCallChunk,
    ) -> anyhow::Result<(ToolCallChunk, Value)> {
        let task_id = &params.task_id;

        // Unknown name: append the call, synthesize a validation-error
        // result listing the known names, and do not dispatch.
        if !self.registry.is_known(&call.name) {
            let known = self.registry.names().join(", ");
            let result = json!({
                "success": false,
                "error": format!("Unknown tool '{}'. Known tools: {known}", call.name),
                "message": "tool name validation failed",
            });
            self.record_call(task_id, fold, &call)?;
            self.record_result(task_id, fold, &call, result.clone(), false)?;
            return Ok((call, result));
        }

        // MCP-namespaced tools are name-valid by convention; this kernel has
        // no MCP transport wired, so execution reports that honestly.  The
        // result is trusted (no shape validation) but length-capped.
        if is_mcp_tool(&call.name) {
            let server = call.name.split(':').next().unwrap_or("");
            let result = json!({
                "error": format!("no MCP client connected for server '{server}'"),
            });
            self.record_call(task_id, fold, &call)?;
            self.record_result(task_id, fold, &call, result.clone(), true)?;
            return Ok((call, result));
        }

        let tool = self
            .registry
            .get(&call.name)
            .expect("known native tool is registered");

        // Argument-shape validation with a single repair attempt.  A
        // repaired call replaces the invalid one entirely: the original
        // never lands in the part list.
        let call = match validate_args_shape(&tool.parameters_schema(), &call.args) {
            Ok(()) => call,
            Err(validation_error) => {
                warn!(task = %task_id, tool = %call.name, error = %validation_error,
                      "invalid tool arguments; attempting repair");
                match self
                    .repair_tool_call(params, &call, &validation_error, &tool.parameters_schema())
                    .await
                {
                    Some(repaired) => repaired,
                    None => {
                        // Second failure: surface as an invalid tool result.
                        let result = json!({
                            "success": false,
                            "error": format!(
                                "invalid arguments for {}: {validation_error}",
                                call.name
                            ),
                            "message": "tool argument validation failed",
                        });
                        self.record_call(task_id, fold, &call)?;
                        self.record_result(task_id, fold, &call, result.clone(), false)?;
                        return Ok((call, result));
                    }
                }
            }
        };

        self.record_call(task_id, fold, &call)?;
        let result = self
            .registry
            .execute(&ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
            })
            .await;
        let (result, is_valid) = match validate_result_shape(&call.name, &result) {
            Ok(()) => (result, true),
            Err(e) => (
                json!({
                    "success": false,
                    "error": format!("tool result failed validation: {e}"),
                    "message": "tool result validation failed",
                }),
                false,
            ),
        };
        self.record_result(task_id, fold, &call, result.clone(), is_valid)?;
        Ok((call, result))
    }

    /// One-shot non-streaming repair: re-issue the request with the failed
    /// call and the validator error appended, and extract the first tool
    /// call matching the failed tool's name.
    async fn repair_tool_call(
        &self,
        params: &StreamParams,
        failed: &ToolCallChunk,
        validation_error: &str,
        schema: &Value,
    ) -> Option<ToolCallChunk> {
        let mut messages = params.history.clone();
        messages.push(Message::tool_call(
            &failed.id,
            &failed.name,
            failed.args.clone(),
        ));
        messages.push(Message::tool_result(
            &failed.id,
            json!({
                "success": false,
                "error": format!("invalid arguments: {validation_error}. Call the tool again \
                                  with arguments matching its schema."),
            }),
        ));
        let req = StreamRequest {
            system: params.system.clone(),
            messages,
            tools: self.tool_schemas(),
            max_tokens: None,
        };
        let completion = match params.provider.complete_once(req).await {
            Ok(c) => c,
            Err(e) => {
                warn!(tool = %failed.name, error = %e, "tool-argument repair call failed");
                return None;
            }
        };
        let candidate = completion
            .tool_calls
            .into_iter()
            .find(|c| c.name == failed.name)?;
        if validate_args_shape(schema, &candidate.args).is_err() {
            return None;
        }
        debug!(tool = %failed.name, "tool arguments repaired");
        // Keep the original call id so UI events that referenced it during
        // streaming stay coherent.
        Some(ToolCallChunk {
            id: failed.id.clone(),
            name: candidate.name,
            args: candidate.args,
        })
    }

    fn record_call(
        &self,
        task_id: &str,
        fold: &mut MessageFold,
        call: &ToolCallChunk,
    ) -> anyhow::Result<()> {
        fold.tool_call(&call.id, &call.name, call.args.clone())?;
        self.emit(task_id, TaskEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.args.clone(),
        });
        Ok(())
    }

    fn record_result(
        &self,
        task_id: &str,
        fold: &mut MessageFold,
        call: &ToolCallChunk,
        result: Value,
        is_valid: bool,
    ) -> anyhow::Result<()> {
        let result = cap_result(&call.name, result);
        fold.tool_result(&call.id, &call.name, result.clone(), is_valid)?;
        self.emit(task_id, TaskEvent::ToolResult {
            id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
            is_valid,
        });
        Ok(())
    }

    fn emit(&self, task_id: &str, event: TaskEvent) {
        self.events.emit(task_id, event);
    }
}

/// MCP results bypass shape validation, so bound their size before they
/// reach the message log.
fn cap_result(tool_name: &str, result: Value) -> Value {
    if !is_mcp_tool(tool_name) {
        return result;
    }
    let serialized = result.to_string();
    if serialized.len() <= MCP_RESULT_MAX_BYTES {
        return result;
    }
    let truncated: String = serialized.chars().take(MCP_RESULT_MAX_BYTES).collect();
    json!({
        "truncated": true,
        "content": truncated,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
