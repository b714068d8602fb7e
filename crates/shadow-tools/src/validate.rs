// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// MCP tools are namespaced `server:tool`.  Native tool names never contain
/// a colon.
pub fn is_mcp_tool(name: &str) -> bool {
    match name.split_once(':') {
        Some((server, tool)) => !server.is_empty() && !tool.is_empty(),
        None => false,
    }
}

/// Cap applied to MCP result payloads before they are persisted.  MCP
/// results bypass shape validation, so a misbehaving server is at least
/// bounded in how much it can write into the message log.
pub const MCP_RESULT_MAX_BYTES: usize = 64 * 1024;

/// Strict result-shape validation for native tools.
///
/// Native tool results are the serialized executor outcome: an object with
/// a boolean `success`, a string `message`, and — when `success` is false —
/// a string `error`.  MCP-namespaced results are trusted and skipped.
pub fn validate_result_shape(tool_name: &str, result: &Value) -> Result<(), String> {
    if is_mcp_tool(tool_name) {
        return Ok(());
    }
    let Some(obj) = result.as_object() else {
        return Err(format!(
            "result of {tool_name} must be an object, got {}",
            type_name(result)
        ));
    };
    match obj.get("success") {
        Some(Value::Bool(success)) => {
            if !success && !matches!(obj.get("error"), Some(Value::String(_))) {
                return Err(format!(
                    "failed result of {tool_name} must carry a string 'error'"
                ));
            }
        }
        Some(other) => {
            return Err(format!(
                "result of {tool_name} has non-boolean 'success': {}",
                type_name(other)
            ));
        }
        None => return Err(format!("result of {tool_name} is missing 'success'")),
    }
    if !matches!(obj.get("message"), Some(Value::String(_))) {
        return Err(format!("result of {tool_name} is missing a string 'message'"));
    }
    Ok(())
}

/// Validate tool-call arguments against the declared parameter schema.
///
/// Covers the shape errors models actually make: non-object arguments,
/// missing required keys, and wrong primitive types.  Full JSON Schema
/// semantics are not needed — the schemas the tools declare only use
/// `properties`, `required`, and primitive `type`s.
pub fn validate_args_shape(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err(format!("arguments must be an object, got {}", type_name(args)));
    };
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !args_obj.contains_key(key) {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }
    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in args_obj {
            let Some(decl) = props.get(key) else {
                continue; // tolerated: extra keys are ignored by the tools
            };
            let Some(expected) = decl.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!(
                    "parameter '{key}' must be a {expected}, got {}",
                    type_name(value)
                ));
            }
        }
    }
    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
