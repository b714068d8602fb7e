// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct GrepTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl GrepTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Optionally restrict \
         to paths ending with a suffix such as \".rs\"."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "include": {
                    "type": "string",
                    "description": "Only search files whose path ends with this suffix"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let pattern = match require_str(call, "pattern") {
            Ok(p) => p,
            Err(v) => return v,
        };
        let include = call.args.get("include").and_then(|v| v.as_str());
        self.executor.grep(pattern, include).await.to_value()
    }
}
