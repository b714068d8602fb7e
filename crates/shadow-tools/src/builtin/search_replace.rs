// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::require_str;
use crate::{Tool, ToolCall, WorkspaceExecutor};

pub struct SearchReplaceTool {
    executor: Arc<dyn WorkspaceExecutor>,
}

impl SearchReplaceTool {
    pub fn new(executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for SearchReplaceTool {
    fn name(&self) -> &str {
        "search_replace"
    }

    fn description(&self) -> &str {
        "Replace exactly one occurrence of old_string with new_string in a \
         file. old_string must be unique in the file; include surrounding \
         lines to disambiguate."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Value {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(v) => return v,
        };
        let old = match require_str(call, "old_string") {
            Ok(o) => o,
            Err(v) => return v,
        };
        let new = match require_str(call, "new_string") {
            Ok(n) => n,
            Err(v) => return v,
        };
        self.executor.search_replace(path, old, new).await.to_value()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::LocalExecutor;

    #[tokio::test]
    async fn replaces_unique_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.rs"), "let x = 1;\n").unwrap();
        let tool = SearchReplaceTool::new(Arc::new(LocalExecutor::new(dir.path())));
        let v = tool
            .execute(&ToolCall {
                id: "c".into(),
                name: "search_replace".into(),
                args: json!({"path": "m.rs", "old_string": "x = 1", "new_string": "x = 2"}),
            })
            .await;
        assert_eq!(v["success"], true);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("m.rs")).unwrap(),
            "let x = 2;\n"
        );
    }
}
