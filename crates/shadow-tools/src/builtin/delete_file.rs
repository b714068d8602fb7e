// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct DeleteFileTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl DeleteFileTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path of the file to delete"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(v) => return v,
        };
        self.executor.delete_file(path).await.to_value()
    }
}
