// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged result of every executor operation.
///
/// Failures are values: `success = false` with `error` set.  Nothing in the
/// executor contract throws across the interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl<T> ExecOutcome<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: message.into(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            data: None,
            message: error.clone(),
            error: Some(error),
        }
    }
}

impl<T: Serialize> ExecOutcome<T> {
    /// Serialize into the wire/tool-result representation.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("result serialization failed: {e}"),
                "message": "result serialization failed",
            })
        })
    }
}

// ── Operation payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub total_lines: usize,
    /// 1-indexed line the returned window starts at.
    pub start_line: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteStats {
    pub path: String,
    pub bytes_written: usize,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceStats {
    pub path: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when the command was detached into the background.
    pub background: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Default foreground shell timeout.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Uniform contract for file, shell, search, and git operations against a
/// workspace — local directory or remote pod sidecar.
#[async_trait]
pub trait WorkspaceExecutor: Send + Sync {
    /// Human-readable mode label for logs (`"local"` / `"remote"`).
    fn mode(&self) -> &str;

    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> ExecOutcome<FileContent>;

    async fn write_file(&self, path: &str, content: &str) -> ExecOutcome<WriteStats>;

    /// Replace exactly one occurrence of `old` with `new`.  Zero or multiple
    /// occurrences fail.
    async fn search_replace(&self, path: &str, old: &str, new: &str) -> ExecOutcome<ReplaceStats>;

    async fn list_directory(&self, path: &str) -> ExecOutcome<Vec<DirEntry>>;

    async fn grep(&self, pattern: &str, include: Option<&str>) -> ExecOutcome<Vec<GrepMatch>>;

    /// Fuzzy filename search.
    async fn search_files(&self, query: &str) -> ExecOutcome<Vec<String>>;

    async fn delete_file(&self, path: &str) -> ExecOutcome<()>;

    async fn run_command(
        &self,
        command: &str,
        background: bool,
        timeout_secs: Option<u64>,
    ) -> ExecOutcome<CommandOutput>;

    async fn web_search(&self, query: &str) -> ExecOutcome<Vec<SearchHit>>;

    /// Semantic search over the repo index; errors until the index is ready.
    async fn semantic_search(&self, query: &str) -> ExecOutcome<Vec<GrepMatch>>;

    // ── Git sub-surface ───────────────────────────────────────────────────────

    async fn git_status(&self) -> ExecOutcome<String>;

    async fn git_diff(&self, base: Option<&str>) -> ExecOutcome<String>;

    /// Stage everything and commit.  Returns the commit sha.
    async fn git_commit(
        &self,
        message: &str,
        co_author_name: &str,
        co_author_email: &str,
    ) -> ExecOutcome<String>;

    async fn git_push(&self, branch: &str, set_upstream: bool) -> ExecOutcome<()>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
