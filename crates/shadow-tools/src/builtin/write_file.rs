// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct WriteFileTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl WriteFileTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write the full contents of a file, creating it (and parent \
         directories) when missing. For a small targeted change prefer \
         search_replace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Complete new file contents"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(v) => return v,
        };
        let content = match require_str(call, "content") {
            Ok(c) => c,
            Err(v) => return v,
        };
        self.executor.write_file(path, content).await.to_value()
    }
}
