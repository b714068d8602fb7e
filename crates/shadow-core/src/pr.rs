// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shadow_db::{PullRequestSnapshot, SnapshotStatus, Store, Task};
use shadow_github::{GitHubClient, NewPullRequest, PullRequest};
use shadow_model::StreamProvider;
use shadow_tools::WorkspaceExecutor;

use crate::ops::generate_pr_text;

/// Subjects of the branch's recent commits, for the PR text generator.
async fn recent_commit_subjects(executor: &Arc<dyn WorkspaceExecutor>) -> Vec<String> {
    let out = executor
        .run_command("git log --format=%s -n 10", false, Some(10))
        .await;
    out.data
        .map(|o| o.stdout.lines().map(|l| l.to_string()).collect())
        .unwrap_or_default()
}

/// Idempotent pull-request creation and update with snapshot persistence.
///
/// Non-blocking by contract: callers log failures and move on — a PR
/// problem never fails the parent stream.
pub struct PrWorker {
    store: Arc<Store>,
}

impl PrWorker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create the draft PR on first call, update its description afterwards.
    /// Returns the snapshot written, or `None` when skipped.
    pub async fn create_or_update(
        &self,
        task: &Task,
        executor: &Arc<dyn WorkspaceExecutor>,
        github: &GitHubClient,
        provider: Option<Arc<dyn StreamProvider>>,
        message_id: &str,
    ) -> anyhow::Result<Option<PullRequestSnapshot>> {
        // Uncommitted changes mean the commit stage was skipped or failed;
        // a PR now would not include them.
        let status = executor.git_status().await;
        if let Some(porcelain) = &status.data {
            if !porcelain.trim().is_empty() {
                debug!(task = %task.id, "uncommitted changes present; skipping PR stage");
                return Ok(None);
            }
        }

        let diff = executor
            .git_diff(Some(&task.base_branch))
            .await
            .data
            .unwrap_or_default();
        let recent_commits = recent_commit_subjects(executor).await;

        let pr = match task.pull_request_number {
            None => {
                let text = generate_pr_text(provider, &diff, &recent_commits).await;
                let pr = github
                    .create_pull_request(
                        &task.repo_full_name,
                        &NewPullRequest {
                            title: text.title,
                            body: text.description,
                            head: task.shadow_branch.clone(),
                            base: task.base_branch.clone(),
                            draft: true,
                        },
                    )
                    .await?;
                self.store.set_pull_request_number(&task.id, pr.number)?;
                info!(task = %task.id, pr = pr.number, "draft pull request opened");
                let snapshot = self.snapshot(task, message_id, &pr, SnapshotStatus::Created)?;
                return Ok(Some(snapshot));
            }
            Some(number) => {
                // Regenerate only the description from the up-to-date diff.
                let text = generate_pr_text(provider, &diff, &recent_commits).await;
                if let Err(e) = github
                    .update_pull_request(
                        &task.repo_full_name,
                        number,
                        None,
                        Some(&text.description),
                    )
                    .await
                {
                    warn!(task = %task.id, pr = number, error = %e, "PR update failed");
                    return Ok(None);
                }
                // Read back the PR so snapshot stats reflect reality.
                github.get_pull_request(&task.repo_full_name, number).await?
            }
        };

        let snapshot = self.snapshot(task, message_id, &pr, SnapshotStatus::Updated)?;
        Ok(Some(snapshot))
    }

    fn snapshot(
        &self,
        task: &Task,
        message_id: &str,
        pr: &PullRequest,
        status: SnapshotStatus,
    ) -> anyhow::Result<PullRequestSnapshot> {
        let snapshot = PullRequestSnapshot {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            message_id: message_id.to_string(),
            status,
            title: pr.title.clone(),
            description: pr.body.clone().unwrap_or_default(),
            files_changed: pr.changed_files,
            lines_added: pr.additions,
            lines_removed: pr.deletions,
            commit_sha: pr.head.as_ref().map(|h| h.sha.clone()).unwrap_or_default(),
            created_at: Utc::now(),
        };
        self.store.insert_snapshot(&snapshot)?;
        self.store.update_message(
            message_id,
            shadow_db::MessageUpdate {
                pr_snapshot_id: Some(snapshot.id.clone()),
                ..Default::default()
            },
        )?;
        Ok(snapshot)
    }
}
