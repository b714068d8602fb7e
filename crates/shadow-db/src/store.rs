// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::{
    Account, ChatMessage, InitStatus, MessageMeta, MessageRole, PullRequestSnapshot,
    SnapshotStatus, Task, TaskStatus, Todo, TodoStatus, ToolMessage, ToolRecordStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id                   TEXT PRIMARY KEY,
    repo_full_name       TEXT NOT NULL,
    repo_url             TEXT NOT NULL,
    base_branch          TEXT NOT NULL,
    shadow_branch        TEXT NOT NULL,
    base_commit_hash     TEXT,
    user_id              TEXT NOT NULL,
    main_model           TEXT NOT NULL,
    title                TEXT NOT NULL,
    status               TEXT NOT NULL,
    init_status          TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    scheduled_cleanup_at TEXT,
    pull_request_number  INTEGER,
    workspace_path       TEXT
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id              TEXT PRIMARY KEY,
    task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    role            TEXT NOT NULL,
    sequence        INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    edited_at       TEXT,
    model           TEXT NOT NULL,
    content         TEXT NOT NULL,
    metadata        TEXT NOT NULL,
    stacked_task_id TEXT,
    pr_snapshot_id  TEXT,
    UNIQUE (task_id, sequence)
);

CREATE TABLE IF NOT EXISTS tool_messages (
    id         TEXT PRIMARY KEY,
    task_id    TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    call_id    TEXT NOT NULL,
    name       TEXT NOT NULL,
    args       TEXT NOT NULL,
    status     TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (task_id, call_id)
);

CREATE TABLE IF NOT EXISTS todos (
    id       TEXT PRIMARY KEY,
    task_id  TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    content  TEXT NOT NULL,
    status   TEXT NOT NULL,
    sequence INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pr_snapshots (
    id            TEXT PRIMARY KEY,
    task_id       TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    message_id    TEXT NOT NULL,
    status        TEXT NOT NULL,
    title         TEXT NOT NULL,
    description   TEXT NOT NULL,
    files_changed INTEGER NOT NULL,
    lines_added   INTEGER NOT NULL,
    lines_removed INTEGER NOT NULL,
    commit_sha    TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    user_id                 TEXT PRIMARY KEY,
    github_login            TEXT NOT NULL,
    email                   TEXT NOT NULL,
    access_token            TEXT NOT NULL,
    refresh_token           TEXT,
    access_token_expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_task_seq ON chat_messages(task_id, sequence);
CREATE INDEX IF NOT EXISTS idx_tasks_cleanup ON tasks(scheduled_cleanup_at);
CREATE INDEX IF NOT EXISTS idx_tasks_pr ON tasks(repo_full_name, pull_request_number);
"#;

/// Parameters for creating a task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub repo_full_name: String,
    pub repo_url: String,
    pub base_branch: String,
    pub shadow_branch: String,
    pub user_id: String,
    pub main_model: String,
    pub title: String,
}

/// Partial update applied to a message row.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub meta: Option<MessageMeta>,
    pub mark_edited: bool,
    pub stacked_task_id: Option<String>,
    pub pr_snapshot_id: Option<String>,
}

/// SQLite-backed store.  All access funnels through one connection guarded
/// by a mutex; the kernel's per-task serialization keeps write contention
/// negligible.
pub struct Store {
    conn: Mutex<Connection>,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp in store: {s}"))?
        .with_timezone(&Utc))
}

fn parse_ts_opt(s: Option<String>) -> anyhow::Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(&v)).transpose()
}

impl Store {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::open(":memory:")
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    pub fn create_task(&self, new: NewTask) -> anyhow::Result<Task> {
        if new.shadow_branch == new.base_branch {
            bail!(
                "shadow branch must differ from base branch: {}",
                new.base_branch
            );
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, repo_full_name, repo_url, base_branch, shadow_branch,
                                user_id, main_model, title, status, init_status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                new.repo_full_name,
                new.repo_url,
                new.base_branch,
                new.shadow_branch,
                new.user_id,
                new.main_model,
                new.title,
                TaskStatus::Initializing.as_str(),
                InitStatus::Inactive.as_str(),
                ts(now),
            ],
        )?;
        drop(conn);
        self.get_task(&id)?
            .context("task vanished immediately after insert")
    }

    pub fn get_task(&self, id: &str) -> anyhow::Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], task_row)
            .optional()
            .map_err(Into::into)
    }

    /// Transition the task's status, enforcing the state machine.
    pub fn set_task_status(&self, id: &str, to: TaskStatus) -> anyhow::Result<Task> {
        let task = self
            .get_task(id)?
            .with_context(|| format!("no such task: {id}"))?;
        if !task.status.can_transition(to) {
            bail!(
                "illegal task transition {} -> {} for {id}",
                task.status.as_str(),
                to.as_str()
            );
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![to.as_str(), ts(Utc::now()), id],
        )?;
        drop(conn);
        debug!(task = %id, to = to.as_str(), "task status transition");
        self.get_task(id)?.context("task vanished during update")
    }

    pub fn set_init_status(&self, id: &str, init: InitStatus) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET init_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![init.as_str(), ts(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_base_commit(&self, id: &str, hash: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET base_commit_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![hash, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_workspace_path(&self, id: &str, path: Option<&str>) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET workspace_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![path, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_pull_request_number(&self, id: &str, number: u64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET pull_request_number = ?1, updated_at = ?2 WHERE id = ?3",
            params![number as i64, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_scheduled_cleanup(
        &self,
        id: &str,
        at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET scheduled_cleanup_at = ?1 WHERE id = ?2",
            params![at.map(ts), id],
        )?;
        Ok(())
    }

    /// Tasks whose scheduled cleanup is due at or before `now`.
    pub fn tasks_due_for_cleanup(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks
             WHERE scheduled_cleanup_at IS NOT NULL AND scheduled_cleanup_at <= ?1",
        )?;
        let rows = stmt.query_map(params![ts(now)], task_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Archive every non-archived task bound to the given PR.  Returns the
    /// ids of the tasks archived.
    pub fn archive_tasks_for_pr(
        &self,
        repo_full_name: &str,
        number: u64,
    ) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM tasks
             WHERE repo_full_name = ?1 AND pull_request_number = ?2 AND status != 'ARCHIVED'",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![repo_full_name, number as i64], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        for id in &ids {
            conn.execute(
                "UPDATE tasks SET status = 'ARCHIVED', updated_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), id],
            )?;
        }
        Ok(ids)
    }

    /// Remove a task and, via cascade, its messages, tool rows, todos, and
    /// snapshots.
    pub fn delete_task(&self, id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Message log ───────────────────────────────────────────────────────────

    /// Append a message, allocating the next dense sequence for the task.
    ///
    /// Concurrent appends to the same task must be serialized by the caller
    /// (the kernel's per-task single-writer invariant); the unique index on
    /// `(task_id, sequence)` turns a violation into a hard error.
    pub fn append_message(
        &self,
        task_id: &str,
        role: MessageRole,
        content: &str,
        model: &str,
        meta: MessageMeta,
    ) -> anyhow::Result<ChatMessage> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let sequence: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM chat_messages WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO chat_messages
                 (id, task_id, role, sequence, created_at, model, content, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                task_id,
                role.as_str(),
                sequence,
                ts(now),
                model,
                content,
                serde_json::to_string(&meta)?,
            ],
        )?;
        drop(conn);
        self.get_message(&id)?
            .context("message vanished immediately after insert")
    }

    pub fn get_message(&self, id: &str) -> anyhow::Result<Option<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM chat_messages WHERE id = ?1",
            params![id],
            message_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn update_message(&self, id: &str, update: MessageUpdate) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        if let Some(content) = &update.content {
            conn.execute(
                "UPDATE chat_messages SET content = ?1 WHERE id = ?2",
                params![content, id],
            )?;
        }
        if let Some(meta) = &update.meta {
            conn.execute(
                "UPDATE chat_messages SET metadata = ?1 WHERE id = ?2",
                params![serde_json::to_string(meta)?, id],
            )?;
        }
        if let Some(child) = &update.stacked_task_id {
            conn.execute(
                "UPDATE chat_messages SET stacked_task_id = ?1 WHERE id = ?2",
                params![child, id],
            )?;
        }
        if let Some(snap) = &update.pr_snapshot_id {
            conn.execute(
                "UPDATE chat_messages SET pr_snapshot_id = ?1 WHERE id = ?2",
                params![snap, id],
            )?;
        }
        if update.mark_edited {
            conn.execute(
                "UPDATE chat_messages SET edited_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), id],
            )?;
        }
        Ok(())
    }

    /// Full ordered history of a task.
    pub fn history(&self, task_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM chat_messages WHERE task_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![task_id], message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn max_sequence(&self, task_id: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM chat_messages WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    /// Drop every message with `sequence > after` (the edit flow's tail
    /// truncation).
    pub fn truncate_after(&self, task_id: &str, after: i64) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM chat_messages WHERE task_id = ?1 AND sequence > ?2",
            params![task_id, after],
        )?;
        Ok(n)
    }

    // ── Tool mirror rows ──────────────────────────────────────────────────────

    pub fn create_tool_message(
        &self,
        task_id: &str,
        call_id: &str,
        name: &str,
        args: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tool_messages
                 (id, task_id, call_id, name, args, status, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                task_id,
                call_id,
                name,
                args.to_string(),
                ToolRecordStatus::Running.status_str(),
                "Running...",
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn complete_tool_message(
        &self,
        task_id: &str,
        call_id: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tool_messages SET status = ?1, content = ?2
             WHERE task_id = ?3 AND call_id = ?4",
            params![
                ToolRecordStatus::Completed.status_str(),
                content,
                task_id,
                call_id
            ],
        )?;
        Ok(())
    }

    pub fn tool_messages(&self, task_id: &str) -> anyhow::Result<Vec<ToolMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tool_messages WHERE task_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![task_id], tool_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Todos ─────────────────────────────────────────────────────────────────

    /// Replace the task's todo list, or merge by id when `merge` is set.
    /// Either way the operation is atomic.
    pub fn write_todos(&self, task_id: &str, items: &[Todo], merge: bool) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if !merge {
            tx.execute("DELETE FROM todos WHERE task_id = ?1", params![task_id])?;
        }
        for item in items {
            tx.execute(
                "INSERT INTO todos (id, task_id, content, status, sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     content = excluded.content,
                     status = excluded.status,
                     sequence = excluded.sequence",
                params![
                    item.id,
                    task_id,
                    item.content,
                    item.status.as_str(),
                    item.sequence
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn todos(&self, task_id: &str) -> anyhow::Result<Vec<Todo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM todos WHERE task_id = ?1 ORDER BY sequence ASC")?;
        let rows = stmt.query_map(params![task_id], todo_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── PR snapshots ──────────────────────────────────────────────────────────

    pub fn insert_snapshot(&self, snap: &PullRequestSnapshot) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pr_snapshots
                 (id, task_id, message_id, status, title, description,
                  files_changed, lines_added, lines_removed, commit_sha, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                snap.id,
                snap.task_id,
                snap.message_id,
                snap.status.as_str(),
                snap.title,
                snap.description,
                snap.files_changed,
                snap.lines_added,
                snap.lines_removed,
                snap.commit_sha,
                ts(snap.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn snapshots(&self, task_id: &str) -> anyhow::Result<Vec<PullRequestSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM pr_snapshots WHERE task_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![task_id], snapshot_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Accounts ──────────────────────────────────────────────────────────────

    pub fn upsert_account(&self, account: &Account) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts
                 (user_id, github_login, email, access_token, refresh_token,
                  access_token_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 github_login = excluded.github_login,
                 email = excluded.email,
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 access_token_expires_at = excluded.access_token_expires_at",
            params![
                account.user_id,
                account.github_login,
                account.email,
                account.access_token,
                account.refresh_token,
                account.access_token_expires_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, user_id: &str) -> anyhow::Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM accounts WHERE user_id = ?1",
            params![user_id],
            account_row,
        )
        .optional()
        .map_err(Into::into)
    }
}

impl ToolRecordStatus {
    fn status_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
        }
    }

    fn parse_status(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

// ── Row mappers ──────────────────────────────────────────────────────────────

fn bad_column(name: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unparseable {name}: {value}").into(),
    )
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_s: String = row.get("status")?;
    let init_s: String = row.get("init_status")?;
    let updated: String = row.get("updated_at")?;
    let cleanup: Option<String> = row.get("scheduled_cleanup_at")?;
    Ok(Task {
        id: row.get("id")?,
        repo_full_name: row.get("repo_full_name")?,
        repo_url: row.get("repo_url")?,
        base_branch: row.get("base_branch")?,
        shadow_branch: row.get("shadow_branch")?,
        base_commit_hash: row.get("base_commit_hash")?,
        user_id: row.get("user_id")?,
        main_model: row.get("main_model")?,
        title: row.get("title")?,
        status: TaskStatus::parse(&status_s).ok_or_else(|| bad_column("status", &status_s))?,
        init_status: InitStatus::parse(&init_s).ok_or_else(|| bad_column("init_status", &init_s))?,
        updated_at: parse_ts(&updated).map_err(|_| bad_column("updated_at", &updated))?,
        scheduled_cleanup_at: match cleanup {
            Some(c) => Some(parse_ts(&c).map_err(|_| bad_column("scheduled_cleanup_at", &c))?),
            None => None,
        },
        pull_request_number: row
            .get::<_, Option<i64>>("pull_request_number")?
            .map(|n| n as u64),
        workspace_path: row.get("workspace_path")?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_s: String = row.get("role")?;
    let created: String = row.get("created_at")?;
    let edited: Option<String> = row.get("edited_at")?;
    let meta_s: String = row.get("metadata")?;
    Ok(ChatMessage {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        role: MessageRole::parse(&role_s).ok_or_else(|| bad_column("role", &role_s))?,
        sequence: row.get("sequence")?,
        created_at: parse_ts(&created).map_err(|_| bad_column("created_at", &created))?,
        edited_at: parse_ts_opt(edited).map_err(|_| bad_column("edited_at", ""))?,
        model: row.get("model")?,
        content: row.get("content")?,
        meta: serde_json::from_str(&meta_s).map_err(|_| bad_column("metadata", &meta_s))?,
        stacked_task_id: row.get("stacked_task_id")?,
        pr_snapshot_id: row.get("pr_snapshot_id")?,
    })
}

fn tool_message_row(row: &Row<'_>) -> rusqlite::Result<ToolMessage> {
    let status_s: String = row.get("status")?;
    let args_s: String = row.get("args")?;
    let created: String = row.get("created_at")?;
    Ok(ToolMessage {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        call_id: row.get("call_id")?,
        name: row.get("name")?,
        args: serde_json::from_str(&args_s).map_err(|_| bad_column("args", &args_s))?,
        status: ToolRecordStatus::parse_status(&status_s)
            .ok_or_else(|| bad_column("status", &status_s))?,
        content: row.get("content")?,
        created_at: parse_ts(&created).map_err(|_| bad_column("created_at", &created))?,
    })
}

fn todo_row(row: &Row<'_>) -> rusqlite::Result<Todo> {
    let status_s: String = row.get("status")?;
    Ok(Todo {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        content: row.get("content")?,
        status: TodoStatus::parse(&status_s).ok_or_else(|| bad_column("status", &status_s))?,
        sequence: row.get("sequence")?,
    })
}

fn snapshot_row(row: &Row<'_>) -> rusqlite::Result<PullRequestSnapshot> {
    let status_s: String = row.get("status")?;
    let created: String = row.get("created_at")?;
    Ok(PullRequestSnapshot {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        message_id: row.get("message_id")?,
        status: SnapshotStatus::parse(&status_s).ok_or_else(|| bad_column("status", &status_s))?,
        title: row.get("title")?,
        description: row.get("description")?,
        files_changed: row.get::<_, i64>("files_changed")? as u32,
        lines_added: row.get::<_, i64>("lines_added")? as u32,
        lines_removed: row.get::<_, i64>("lines_removed")? as u32,
        commit_sha: row.get("commit_sha")?,
        created_at: parse_ts(&created).map_err(|_| bad_column("created_at", &created))?,
    })
}

fn account_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let expires: Option<String> = row.get("access_token_expires_at")?;
    Ok(Account {
        user_id: row.get("user_id")?,
        github_login: row.get("github_login")?,
        email: row.get("email")?,
        access_token: row.get("access_token")?,
        refresh_token: row.get("refresh_token")?,
        access_token_expires_at: parse_ts_opt(expires)
            .map_err(|_| bad_column("access_token_expires_at", ""))?,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::MessagePart;

    fn store() -> Store {
        Store::in_memory().unwrap()
    }

    fn new_task(store: &Store) -> Task {
        store
            .create_task(NewTask {
                repo_full_name: "octo/repo".into(),
                repo_url: "https://github.com/octo/repo.git".into(),
                base_branch: "main".into(),
                shadow_branch: "shadow/foo-abc123".into(),
                user_id: "user-1".into(),
                main_model: "claude-sonnet-4".into(),
                title: "add health endpoint".into(),
            })
            .unwrap()
    }

    // ── Task rows ─────────────────────────────────────────────────────────────

    #[test]
    fn create_task_starts_initializing_and_inactive() {
        let s = store();
        let t = new_task(&s);
        assert_eq!(t.status, TaskStatus::Initializing);
        assert_eq!(t.init_status, InitStatus::Inactive);
        assert!(t.base_commit_hash.is_none());
        assert!(t.scheduled_cleanup_at.is_none());
    }

    #[test]
    fn shadow_branch_must_differ_from_base() {
        let s = store();
        let err = s
            .create_task(NewTask {
                repo_full_name: "o/r".into(),
                repo_url: "u".into(),
                base_branch: "main".into(),
                shadow_branch: "main".into(),
                user_id: "u".into(),
                main_model: "m".into(),
                title: "t".into(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let s = store();
        let t = new_task(&s);
        // INITIALIZING -> COMPLETED skips RUNNING
        assert!(s.set_task_status(&t.id, TaskStatus::Completed).is_err());
    }

    #[test]
    fn archived_rejects_all_exits() {
        let s = store();
        let t = new_task(&s);
        s.set_task_status(&t.id, TaskStatus::Archived).unwrap();
        assert!(s.set_task_status(&t.id, TaskStatus::Running).is_err());
        assert!(s.set_task_status(&t.id, TaskStatus::Initializing).is_err());
    }

    #[test]
    fn cleanup_query_returns_due_tasks_only() {
        let s = store();
        let due = new_task(&s);
        let not_due = s
            .create_task(NewTask {
                repo_full_name: "o/r".into(),
                repo_url: "u".into(),
                base_branch: "main".into(),
                shadow_branch: "shadow/other-xyz789".into(),
                user_id: "u".into(),
                main_model: "m".into(),
                title: "t".into(),
            })
            .unwrap();
        let now = Utc::now();
        s.set_scheduled_cleanup(&due.id, Some(now - Duration::minutes(1)))
            .unwrap();
        s.set_scheduled_cleanup(&not_due.id, Some(now + Duration::minutes(10)))
            .unwrap();

        let found = s.tasks_due_for_cleanup(now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn archive_tasks_for_pr_returns_ids_and_is_idempotent() {
        let s = store();
        let t = new_task(&s);
        s.set_pull_request_number(&t.id, 42).unwrap();
        assert_eq!(
            s.archive_tasks_for_pr("octo/repo", 42).unwrap(),
            vec![t.id.clone()]
        );
        // Already archived: second call archives nothing.
        assert!(s.archive_tasks_for_pr("octo/repo", 42).unwrap().is_empty());
        let t = s.get_task(&t.id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Archived);
    }

    // ── Message log ───────────────────────────────────────────────────────────

    #[test]
    fn sequences_are_dense_from_one() {
        let s = store();
        let t = new_task(&s);
        for i in 1..=4 {
            let m = s
                .append_message(&t.id, MessageRole::User, "hi", "m", MessageMeta::default())
                .unwrap();
            assert_eq!(m.sequence, i);
        }
    }

    #[test]
    fn sequences_are_per_task() {
        let s = store();
        let a = new_task(&s);
        let b = s
            .create_task(NewTask {
                repo_full_name: "o/r2".into(),
                repo_url: "u".into(),
                base_branch: "main".into(),
                shadow_branch: "shadow/b-123456".into(),
                user_id: "u".into(),
                main_model: "m".into(),
                title: "t".into(),
            })
            .unwrap();
        s.append_message(&a.id, MessageRole::User, "x", "m", MessageMeta::default())
            .unwrap();
        let mb = s
            .append_message(&b.id, MessageRole::User, "y", "m", MessageMeta::default())
            .unwrap();
        assert_eq!(mb.sequence, 1);
    }

    #[test]
    fn truncate_after_drops_the_tail() {
        let s = store();
        let t = new_task(&s);
        for _ in 0..5 {
            s.append_message(&t.id, MessageRole::User, "m", "m", MessageMeta::default())
                .unwrap();
        }
        let dropped = s.truncate_after(&t.id, 2).unwrap();
        assert_eq!(dropped, 3);
        assert_eq!(s.max_sequence(&t.id).unwrap(), 2);
        // Appending after truncation resumes the dense sequence.
        let m = s
            .append_message(&t.id, MessageRole::User, "m", "m", MessageMeta::default())
            .unwrap();
        assert_eq!(m.sequence, 3);
    }

    #[test]
    fn metadata_round_trips_parts() {
        let s = store();
        let t = new_task(&s);
        let meta = MessageMeta {
            parts: vec![
                MessagePart::Reasoning {
                    text: "hmm".into(),
                    signature: Some("sig".into()),
                },
                MessagePart::text("answer"),
            ],
            is_streaming: true,
            ..Default::default()
        };
        let m = s
            .append_message(&t.id, MessageRole::Assistant, "answer", "m", meta.clone())
            .unwrap();
        let back = s.get_message(&m.id).unwrap().unwrap();
        assert_eq!(back.meta, meta);
        assert_eq!(back.content, "answer");
    }

    #[test]
    fn update_message_marks_edited() {
        let s = store();
        let t = new_task(&s);
        let m = s
            .append_message(&t.id, MessageRole::User, "before", "m", MessageMeta::default())
            .unwrap();
        assert!(m.edited_at.is_none());
        s.update_message(
            &m.id,
            MessageUpdate {
                content: Some("after".into()),
                mark_edited: true,
                ..Default::default()
            },
        )
        .unwrap();
        let back = s.get_message(&m.id).unwrap().unwrap();
        assert_eq!(back.content, "after");
        assert!(back.edited_at.is_some());
    }

    #[test]
    fn history_orders_by_sequence() {
        let s = store();
        let t = new_task(&s);
        s.append_message(&t.id, MessageRole::User, "one", "m", MessageMeta::default())
            .unwrap();
        s.append_message(&t.id, MessageRole::Assistant, "two", "m", MessageMeta::default())
            .unwrap();
        let h = s.history(&t.id).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].content, "one");
        assert_eq!(h[1].content, "two");
    }

    // ── Tool rows, todos, snapshots ───────────────────────────────────────────

    #[test]
    fn tool_message_lifecycle_running_to_completed() {
        let s = store();
        let t = new_task(&s);
        s.create_tool_message(&t.id, "call-1", "read_file", &serde_json::json!({"path": "x"}))
            .unwrap();
        let rows = s.tool_messages(&t.id).unwrap();
        assert_eq!(rows[0].status, ToolRecordStatus::Running);
        assert_eq!(rows[0].content, "Running...");

        s.complete_tool_message(&t.id, "call-1", "file contents").unwrap();
        let rows = s.tool_messages(&t.id).unwrap();
        assert_eq!(rows[0].status, ToolRecordStatus::Completed);
        assert_eq!(rows[0].content, "file contents");
    }

    #[test]
    fn write_todos_replace_and_merge() {
        let s = store();
        let t = new_task(&s);
        let todo = |id: &str, content: &str, seq: i64| Todo {
            id: id.into(),
            task_id: t.id.clone(),
            content: content.into(),
            status: TodoStatus::Pending,
            sequence: seq,
        };
        s.write_todos(&t.id, &[todo("a", "first", 1), todo("b", "second", 2)], false)
            .unwrap();
        assert_eq!(s.todos(&t.id).unwrap().len(), 2);

        // Merge updates "a" in place and keeps "b".
        let mut updated = todo("a", "first done", 1);
        updated.status = TodoStatus::Completed;
        s.write_todos(&t.id, &[updated], true).unwrap();
        let todos = s.todos(&t.id).unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].status, TodoStatus::Completed);

        // Replace drops everything not in the new list.
        s.write_todos(&t.id, &[todo("c", "third", 1)], false).unwrap();
        let todos = s.todos(&t.id).unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].id, "c");
    }

    #[test]
    fn cascade_delete_removes_children() {
        let s = store();
        let t = new_task(&s);
        s.append_message(&t.id, MessageRole::User, "m", "m", MessageMeta::default())
            .unwrap();
        s.create_tool_message(&t.id, "c1", "grep", &serde_json::json!({}))
            .unwrap();
        s.delete_task(&t.id).unwrap();
        assert!(s.get_task(&t.id).unwrap().is_none());
        assert!(s.history(&t.id).unwrap().is_empty());
        assert!(s.tool_messages(&t.id).unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let s = store();
        let t = new_task(&s);
        let m = s
            .append_message(&t.id, MessageRole::Assistant, "", "m", MessageMeta::default())
            .unwrap();
        let snap = PullRequestSnapshot {
            id: Uuid::new_v4().to_string(),
            task_id: t.id.clone(),
            message_id: m.id.clone(),
            status: SnapshotStatus::Created,
            title: "Add health endpoint".into(),
            description: "adds /health".into(),
            files_changed: 2,
            lines_added: 40,
            lines_removed: 3,
            commit_sha: "abc123".into(),
            created_at: Utc::now(),
        };
        s.insert_snapshot(&snap).unwrap();
        let snaps = s.snapshots(&t.id).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].status, SnapshotStatus::Created);
        assert_eq!(snaps[0].files_changed, 2);
    }

    #[test]
    fn account_upsert_and_get() {
        let s = store();
        let acct = Account {
            user_id: "u1".into(),
            github_login: "octocat".into(),
            email: "octo@example.com".into(),
            access_token: "gho_abc".into(),
            refresh_token: Some("ghr_def".into()),
            access_token_expires_at: Some(Utc::now()),
        };
        s.upsert_account(&acct).unwrap();
        let back = s.get_account("u1").unwrap().unwrap();
        assert_eq!(back.github_login, "octocat");

        // Upsert replaces the token.
        let refreshed = Account {
            access_token: "gho_new".into(),
            ..acct
        };
        s.upsert_account(&refreshed).unwrap();
        assert_eq!(s.get_account("u1").unwrap().unwrap().access_token, "gho_new");
    }
}
