// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

use shadow_git::{CommitIdentity, GitWorker};

use crate::executor::{
    CommandOutput, DirEntry, ExecOutcome, FileContent, GrepMatch, ReplaceStats, SearchHit,
    WriteStats, WorkspaceExecutor, DEFAULT_COMMAND_TIMEOUT_SECS,
};

/// Default number of lines returned by a read when no limit is given.
const DEFAULT_READ_LIMIT: usize = 500;
/// Cap on grep matches so one broad pattern cannot flood the model context.
const MAX_GREP_MATCHES: usize = 200;
/// Cap on fuzzy filename hits.
const MAX_FILE_HITS: usize = 50;

/// Executor operating directly on a workspace directory of this host.
pub struct LocalExecutor {
    workspace: PathBuf,
    git: GitWorker,
}

impl LocalExecutor {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            git: GitWorker::new(&workspace),
            workspace,
        }
    }

    /// Resolve a tool-supplied path inside the workspace.
    ///
    /// Absolute paths and `..` traversal are rejected — the workspace
    /// directory is the executor's entire world.
    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let rel = Path::new(path);
        if rel.is_absolute() {
            return Err(format!("absolute paths are not allowed: {path}"));
        }
        for comp in rel.components() {
            if matches!(comp, Component::ParentDir) {
                return Err(format!("path escapes the workspace: {path}"));
            }
        }
        Ok(self.workspace.join(rel))
    }
}

#[async_trait]
impl WorkspaceExecutor for LocalExecutor {
    fn mode(&self) -> &str {
        "local"
    }

    async fn read_file(
        &self,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> ExecOutcome<FileContent> {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return ExecOutcome::err(e),
        };
        let bytes = match tokio::fs::read(&full).await {
            Ok(b) => b,
            Err(e) => return ExecOutcome::err(format!("read error: {e}")),
        };
        let text = String::from_utf8_lossy(&bytes);
        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_READ_LIMIT);
        let window: Vec<&str> = all_lines
            .iter()
            .skip(start - 1)
            .take(limit)
            .copied()
            .collect();
        let truncated = start - 1 + window.len() < total;
        let shown = window.len();
        ExecOutcome::ok(
            FileContent {
                path: path.to_string(),
                content: window.join("\n"),
                total_lines: total,
                start_line: start,
                truncated,
            },
            format!("read {shown} of {total} lines"),
        )
    }

    async fn write_file(&self, path: &str, content: &str) -> ExecOutcome<WriteStats> {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return ExecOutcome::err(e),
        };
        let created = !full.exists();
        if let Some(parent) = full.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ExecOutcome::err(format!("creating parent dirs: {e}"));
            }
        }
        match tokio::fs::write(&full, content).await {
            Ok(()) => ExecOutcome::ok(
                WriteStats {
                    path: path.to_string(),
                    bytes_written: content.len(),
                    created,
                },
                format!(
                    "{} {path}",
                    if created { "created" } else { "overwrote" }
                ),
            ),
            Err(e) => ExecOutcome::err(format!("write error: {e}")),
        }
    }

    async fn search_replace(&self, path: &str, old: &str, new: &str) -> ExecOutcome<ReplaceStats> {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return ExecOutcome::err(e),
        };
        let text = match tokio::fs::read_to_string(&full).await {
            Ok(t) => t,
            Err(e) => return ExecOutcome::err(format!("read error: {e}")),
        };
        let occurrences = text.matches(old).count();
        if occurrences == 0 {
            return ExecOutcome::err(format!("old string not found in {path}"));
        }
        if occurrences > 1 {
            return ExecOutcome::err(format!(
                "old string occurs {occurrences} times in {path}; it must be unique"
            ));
        }
        let replaced = text.replacen(old, new, 1);
        match tokio::fs::write(&full, replaced).await {
            Ok(()) => ExecOutcome::ok(
                ReplaceStats {
                    path: path.to_string(),
                    occurrences: 1,
                },
                format!("replaced 1 occurrence in {path}"),
            ),
            Err(e) => ExecOutcome::err(format!("write error: {e}")),
        }
    }

    async fn list_directory(&self, path: &str) -> ExecOutcome<Vec<DirEntry>> {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return ExecOutcome::err(e),
        };
        let mut read_dir = match tokio::fs::read_dir(&full).await {
            Ok(r) => r,
            Err(e) => return ExecOutcome::err(format!("list error: {e}")),
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let n = entries.len();
        ExecOutcome::ok(entries, format!("{n} entries"))
    }

    async fn grep(&self, pattern: &str, include: Option<&str>) -> ExecOutcome<Vec<GrepMatch>> {
        let re = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ExecOutcome::err(format!("invalid pattern: {e}")),
        };
        let mut matches = Vec::new();
        'files: for entry in WalkDir::new(&self.workspace)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry
                .path()
                .strip_prefix(&self.workspace)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            if let Some(suffix) = include {
                if !rel.ends_with(suffix) {
                    continue;
                }
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            for (i, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(GrepMatch {
                        path: rel.clone(),
                        line_number: i + 1,
                        line: line.to_string(),
                    });
                    if matches.len() >= MAX_GREP_MATCHES {
                        break 'files;
                    }
                }
            }
        }
        let n = matches.len();
        ExecOutcome::ok(matches, format!("{n} matches"))
    }

    async fn search_files(&self, query: &str) -> ExecOutcome<Vec<String>> {
        let needle = query.to_ascii_lowercase();
        let mut hits = Vec::new();
        for entry in WalkDir::new(&self.workspace)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry
                .path()
                .strip_prefix(&self.workspace)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            if rel.to_ascii_lowercase().contains(&needle) {
                hits.push(rel);
                if hits.len() >= MAX_FILE_HITS {
                    break;
                }
            }
        }
        let n = hits.len();
        ExecOutcome::ok(hits, format!("{n} files"))
    }

    async fn delete_file(&self, path: &str) -> ExecOutcome<()> {
        let full = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return ExecOutcome::err(e),
        };
        match tokio::fs::remove_file(&full).await {
            Ok(()) => ExecOutcome::ok((), format!("deleted {path}")),
            Err(e) => ExecOutcome::err(format!("delete error: {e}")),
        }
    }

    async fn run_command(
        &self,
        command: &str,
        background: bool,
        timeout_secs: Option<u64>,
    ) -> ExecOutcome<CommandOutput> {
        debug!(command, background, "running shell command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if background {
            // Detached: spawn and return immediately; output is not awaited.
            return match cmd.spawn() {
                Ok(_child) => ExecOutcome::ok(
                    CommandOutput {
                        command: command.to_string(),
                        exit_code: None,
                        stdout: String::new(),
                        stderr: String::new(),
                        background: true,
                    },
                    "command started in background",
                ),
                Err(e) => ExecOutcome::err(format!("spawn error: {e}")),
            };
        }

        let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS));
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ExecOutcome::err(format!("spawn error: {e}")),
            Err(_) => {
                warn!(command, timeout_secs = timeout.as_secs(), "command timed out");
                return ExecOutcome::err(format!(
                    "command timed out after {}s",
                    timeout.as_secs()
                ));
            }
        };
        let exit_code = output.status.code();
        let out = CommandOutput {
            command: command.to_string(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            background: false,
        };
        if output.status.success() {
            ExecOutcome::ok(out, "command succeeded")
        } else {
            // A non-zero exit is still a successful *execution*; the model
            // needs the output either way.
            ExecOutcome::ok(out, format!("command exited with {exit_code:?}"))
        }
    }

    async fn web_search(&self, _query: &str) -> ExecOutcome<Vec<SearchHit>> {
        ExecOutcome::err("web search is not available in local mode")
    }

    async fn semantic_search(&self, _query: &str) -> ExecOutcome<Vec<GrepMatch>> {
        ExecOutcome::err("semantic search requires the repository index sidecar")
    }

    async fn git_status(&self) -> ExecOutcome<String> {
        match self.git.status_porcelain().await {
            Ok(s) => ExecOutcome::ok(s, "status"),
            Err(e) => ExecOutcome::err(e.to_string()),
        }
    }

    async fn git_diff(&self, base: Option<&str>) -> ExecOutcome<String> {
        match self.git.diff(base).await {
            Ok(d) => ExecOutcome::ok(d, "diff"),
            Err(e) => ExecOutcome::err(e.to_string()),
        }
    }

    async fn git_commit(
        &self,
        message: &str,
        co_author_name: &str,
        co_author_email: &str,
    ) -> ExecOutcome<String> {
        let identity = CommitIdentity::shadow(co_author_name, co_author_email);
        match self.git.commit(&identity, message).await {
            Ok(sha) => ExecOutcome::ok(sha, "committed"),
            Err(e) => ExecOutcome::err(e.to_string()),
        }
    }

    async fn git_push(&self, branch: &str, set_upstream: bool) -> ExecOutcome<()> {
        match self.git.push(branch, set_upstream).await {
            Ok(()) => ExecOutcome::ok((), format!("pushed {branch}")),
            Err(e) => ExecOutcome::err(e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
