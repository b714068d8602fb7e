// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct ReadFileTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl ReadFileTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Optionally pass a 1-indexed start_line \
         and a line limit to read a window of a large file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                },
                "start_line": {
                    "type": "integer",
                    "description": "1-indexed line to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
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
        let offset = call
            .args
            .get("start_line")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);
        self.executor.read_file(path, offset, limit).await.to_value()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::LocalExecutor;

    #[tokio::test]
    async fn reads_through_the_executor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\nbeta\n").unwrap();
        let tool = ReadFileTool::new(Arc::new(LocalExecutor::new(dir.path())));
        let v = tool
            .execute(&ToolCall {
                id: "c1".into(),
                name: "read_file".into(),
                args: json!({"path": "a.txt"}),
            })
            .await;
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["content"], "alpha\nbeta");
    }

    #[tokio::test]
    async fn missing_path_is_error_value() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(Arc::new(LocalExecutor::new(dir.path())));
        let v = tool
            .execute(&ToolCall {
                id: "c1".into(),
                name: "read_file".into(),
                args: json!({}),
            })
            .await;
        assert_eq!(v["success"], false);
    }
}
