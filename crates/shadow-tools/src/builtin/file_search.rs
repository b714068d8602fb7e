// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct FileSearchTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl FileSearchTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Fuzzy filename search: returns workspace paths containing the query \
         (case-insensitive)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Substring to look for in file paths"
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
        self.executor.search_files(query).await.to_value()
    }
}
