// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct WebSearchTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl WebSearchTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for documentation, error messages, or library usage."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let query = match require_str(call, "query") {
            Ok(q) => q,
            Err(v) => return v,
        };
        self.executor.web_search(query).await.to_value()
    }
}
