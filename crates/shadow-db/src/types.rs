// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MessageMeta;

/// Lifecycle status of a task.  `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Initializing,
    Running,
    Completed,
    Stopped,
    Failed,
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALIZING" => Some(Self::Initializing),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "STOPPED" => Some(Self::Stopped),
            "FAILED" => Some(Self::Failed),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }

    /// The task status state machine.  Every transition the kernel performs
    /// goes through this check; ARCHIVED admits no exits.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == Archived {
            return false;
        }
        match (self, to) {
            (_, Archived) => true,
            (Initializing, Running) => true,
            (Running, Completed) | (Running, Stopped) | (Running, Failed) => true,
            (Completed, Initializing) | (Stopped, Initializing) | (Failed, Initializing) => true,
            (Completed, Running) | (Stopped, Running) | (Failed, Running) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// Whether the task's sandbox/workspace is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitStatus {
    Inactive,
    Active,
}

impl InitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(Self::Inactive),
            "ACTIVE" => Some(Self::Active),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub repo_full_name: String,
    pub repo_url: String,
    pub base_branch: String,
    /// The task's dedicated working branch (`shadow/<slug>-<suffix>`).
    /// Never equal to `base_branch`.
    pub shadow_branch: String,
    /// HEAD of the base branch at clone time; set once the sandbox is ready.
    pub base_commit_hash: Option<String>,
    pub user_id: String,
    pub main_model: String,
    pub title: String,
    pub status: TaskStatus,
    pub init_status: InitStatus,
    pub updated_at: DateTime<Utc>,
    pub scheduled_cleanup_at: Option<DateTime<Utc>>,
    pub pull_request_number: Option<u64>,
    pub workspace_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One row of the per-task message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub task_id: String,
    pub role: MessageRole,
    /// Dense per-task sequence starting at 1.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub model: String,
    pub content: String,
    pub meta: MessageMeta,
    /// Set on the parent-side placeholder row that references a stacked
    /// child task.
    pub stacked_task_id: Option<String>,
    pub pr_snapshot_id: Option<String>,
}

/// Dedicated per-tool row mirroring a `tool-call` part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMessage {
    pub id: String,
    pub task_id: String,
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub status: crate::ToolRecordStatus,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub task_id: String,
    pub content: String,
    pub status: TodoStatus,
    pub sequence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    Created,
    Updated,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "UPDATED" => Some(Self::Updated),
            _ => None,
        }
    }
}

/// One row per PR transition, bound to the assistant message that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    pub id: String,
    pub task_id: String,
    pub message_id: String,
    pub status: SnapshotStatus,
    pub title: String,
    pub description: String,
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub commit_sha: String,
    pub created_at: DateTime<Utc>,
}

/// GitHub account credentials for a user, consumed by the token refresher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub github_login: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
