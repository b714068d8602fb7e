// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct ListDirTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl ListDirTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory. Pass an empty path for \
         the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative directory path (default: root)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        self.executor.list_directory(path).await.to_value()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::LocalExecutor;

    #[tokio::test]
    async fn lists_root_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let tool = ListDirTool::new(Arc::new(LocalExecutor::new(dir.path())));
        let v = tool
            .execute(&ToolCall {
                id: "c".into(),
                name: "list_directory".into(),
                args: json!({}),
            })
            .await;
        assert_eq!(v["success"], true);
        assert_eq!(v["data"][0]["name"], "f.txt");
    }
}
