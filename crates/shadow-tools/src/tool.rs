// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// Trait every native tool implements.
///
/// `execute` returns the tool-result payload as a JSON value — an
/// [`crate::ExecOutcome`] serialization for native tools.  Failures are
/// carried inside the value, never as errors.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, call: &ToolCall) -> Value;
}

/// Fetch a required string argument, or produce the error value the model
/// sees.
pub(crate) fn require_str<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str, Value> {
    match call.args.get(key).and_then(|v| v.as_str()) {
        Some(s) => Ok(s),
        None => Err(crate::ExecOutcome::<()>::err(format!(
            "missing required parameter '{key}'"
        ))
        .to_value()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn require_str_reads_present_argument() {
        let call = ToolCall {
            id: "c".into(),
            name: "t".into(),
            args: json!({"path": "a.rs"}),
        };
        assert_eq!(require_str(&call, "path").unwrap(), "a.rs");
    }

    #[test]
    fn require_str_missing_is_error_value() {
        let call = ToolCall {
            id: "c".into(),
            name: "t".into(),
            args: json!({}),
        };
        let err = require_str(&call, "path").unwrap_err();
        assert_eq!(err["success"], false);
        assert!(err["error"]
            .as_str()
            .unwrap()
            .contains("missing required parameter"));
    }
}
