// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shadow_tools::{
    CommandOutput, DirEntry, ExecOutcome, FileContent, GrepMatch, ReplaceStats, SearchHit,
    WorkspaceExecutor, WriteStats, DEFAULT_COMMAND_TIMEOUT_SECS,
};

use crate::SandboxController;

/// Per-request transport timeout for ordinary sidecar calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Tool executor speaking JSON-over-HTTP to the pod's sidecar.
///
/// The pod address is discovered through the sandbox controller on first
/// use and cached for the life of the executor; a transport failure is a
/// value on the executor contract, never an exception.
pub struct RemoteExecutor {
    controller: Arc<SandboxController>,
    task_id: String,
    client: reqwest::Client,
    address: Mutex<Option<String>>,
}

impl RemoteExecutor {
    pub fn new(controller: Arc<SandboxController>, task_id: impl Into<String>) -> Self {
        Self {
            controller,
            task_id: task_id.into(),
            client: reqwest::Client::new(),
            address: Mutex::new(None),
        }
    }

    async fn base_url(&self) -> Result<String, String> {
        if let Some(addr) = self.address.lock().unwrap().clone() {
            return Ok(addr);
        }
        match self.controller.sidecar_address(&self.task_id).await {
            Ok(addr) => {
                *self.address.lock().unwrap() = Some(addr.clone());
                Ok(addr)
            }
            Err(e) => Err(format!("sidecar address lookup failed: {e}")),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Value,
        timeout: Duration,
    ) -> ExecOutcome<T> {
        let base = match self.base_url().await {
            Ok(b) => b,
            Err(e) => return ExecOutcome::err(e),
        };
        debug!(task = %self.task_id, endpoint, "sidecar call");
        let resp = match self
            .client
            .post(format!("{base}/{endpoint}"))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(task = %self.task_id, endpoint, error = %e, "sidecar transport error");
                return ExecOutcome::err(format!("sidecar transport error: {e}"));
            }
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return ExecOutcome::err(format!("sidecar error {status}: {text}"));
        }
        match resp.json::<ExecOutcome<T>>().await {
            Ok(outcome) => outcome,
            Err(e) => ExecOutcome::err(format!("sidecar response parse error: {e}")),
        }
    }
}

#[async_trait]
impl WorkspaceExecutor for RemoteExecutor {
    fn mode(&self) -> &str {
        "remote"
    }

    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> ExecOutcome<FileContent> {
        self.call(
            "readFile",
            json!({ "path": path, "startLine": offset, "limit": limit }),
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn write_file(&self, path: &str, content: &str) -> ExecOutcome<WriteStats> {
        self.call(
            "writeFile",
            json!({ "path": path, "content": content }),
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn search_replace(&self, path: &str, old: &str, new: &str) -> ExecOutcome<ReplaceStats> {
        self.call(
            "searchReplace",
            json!({ "path": path, "oldString": old, "newString": new }),
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn list_directory(&self, path: &str) -> ExecOutcome<Vec<DirEntry>> {
        self.call("listDirectory", json!({ "path": path }), REQUEST_TIMEOUT)
            .await
    }

    async fn grep(&self, pattern: &str, include: Option<&str>) -> ExecOutcome<Vec<GrepMatch>> {
        self.call(
            "grepSearch",
            json!({ "pattern": pattern, "include": include }),
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn search_files(&self, query: &str) -> ExecOutcome<Vec<String>> {
        self.call("searchFiles", json!({ "query": query }), REQUEST_TIMEOUT)
            .await
    }

    async fn delete_file(&self, path: &str) -> ExecOutcome<()> {
        self.call("deleteFile", json!({ "path": path }), REQUEST_TIMEOUT)
            .await
    }

    async fn run_command(
        &self,
        command: &str,
        background: bool,
        timeout_secs: Option<u64>,
    ) -> ExecOutcome<CommandOutput> {
        let secs = timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
        // Transport deadline rides above the command's own timeout.
        let transport = Duration::from_secs(secs + 10);
        self.call(
            "execute/command",
            json!({ "command": command, "isBackground": background, "timeout": secs }),
            transport,
        )
        .await
    }

    async fn web_search(&self, query: &str) -> ExecOutcome<Vec<SearchHit>> {
        self.call("webSearch", json!({ "query": query }), REQUEST_TIMEOUT)
            .await
    }

    async fn semantic_search(&self, query: &str) -> ExecOutcome<Vec<GrepMatch>> {
        self.call("semanticSearch", json!({ "query": query }), REQUEST_TIMEOUT)
            .await
    }

    async fn git_status(&self) -> ExecOutcome<String> {
        self.call("getGitStatus", json!({}), REQUEST_TIMEOUT).await
    }

    async fn git_diff(&self, base: Option<&str>) -> ExecOutcome<String> {
        self.call("getGitDiff", json!({ "base": base }), REQUEST_TIMEOUT)
            .await
    }

    async fn git_commit(
        &self,
        message: &str,
        co_author_name: &str,
        co_author_email: &str,
    ) -> ExecOutcome<String> {
        self.call(
            "commitChanges",
            json!({
                "message": message,
                "coAuthorName": co_author_name,
                "coAuthorEmail": co_author_email,
            }),
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn git_push(&self, branch: &str, set_upstream: bool) -> ExecOutcome<()> {
        self.call(
            "pushBranch",
            json!({ "branch": branch, "setUpstream": set_upstream }),
            REQUEST_TIMEOUT,
        )
        .await
    }
}
