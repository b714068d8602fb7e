// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shadow_db::{InitStatus, Store, Task};

/// Sandbox teardown as seen by the scheduler.  The live implementation
/// wraps the pod controller (remote) or removes the workspace directory
/// (local); teardown of an already-gone sandbox must be a no-op.
#[async_trait]
pub trait SandboxTeardown: Send + Sync {
    async fn teardown(&self, task: &Task) -> anyhow::Result<()>;
}

/// Periodic sweep over tasks whose scheduled cleanup has come due.
pub struct CleanupScheduler {
    store: Arc<Store>,
    teardown: Arc<dyn SandboxTeardown>,
    interval: Duration,
}

impl CleanupScheduler {
    pub fn new(store: Arc<Store>, teardown: Arc<dyn SandboxTeardown>, interval: Duration) -> Self {
        Self {
            store,
            teardown,
            interval,
        }
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "cleanup scheduler running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("cleanup scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "cleanup sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep pass.  Returns the number of tasks cleaned up.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let due = self.store.tasks_due_for_cleanup(Utc::now())?;
        let mut cleaned = 0;
        for task in due {
            debug!(task = %task.id, "tearing down idle sandbox");
            if let Err(e) = self.teardown.teardown(&task).await {
                // Leave the schedule in place; the next sweep retries.
                warn!(task = %task.id, error = %e, "sandbox teardown failed");
                continue;
            }
            self.store.set_init_status(&task.id, InitStatus::Inactive)?;
            self.store.set_scheduled_cleanup(&task.id, None)?;
            cleaned += 1;
        }
        if cleaned > 0 {
            info!(count = cleaned, "idle sandboxes cleaned up");
        }
        Ok(cleaned)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;

    use super::*;
    use shadow_db::NewTask;

    #[derive(Default)]
    struct RecordingTeardown {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SandboxTeardown for RecordingTeardown {
        async fn teardown(&self, _task: &Task) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("pod api unavailable");
            }
            Ok(())
        }
    }

    fn seed_task(store: &Store, branch: &str) -> Task {
        store
            .create_task(NewTask {
                repo_full_name: "o/r".into(),
                repo_url: "u".into(),
                base_branch: "main".into(),
                shadow_branch: branch.into(),
                user_id: "u1".into(),
                main_model: "claude-sonnet-4-5".into(),
                title: "t".into(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_tears_down_due_tasks_and_clears_schedule() {
        let store = Arc::new(Store::in_memory().unwrap());
        let task = seed_task(&store, "shadow/a-000001");
        store.set_init_status(&task.id, InitStatus::Active).unwrap();
        store
            .set_scheduled_cleanup(&task.id, Some(Utc::now() - ChronoDuration::minutes(1)))
            .unwrap();

        let teardown = Arc::new(RecordingTeardown::default());
        let scheduler = CleanupScheduler::new(store.clone(), teardown.clone(), Duration::from_secs(60));
        assert_eq!(scheduler.sweep().await.unwrap(), 1);
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 1);

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.init_status, InitStatus::Inactive);
        assert!(task.scheduled_cleanup_at.is_none());
    }

    #[tokio::test]
    async fn sweep_skips_tasks_not_yet_due() {
        let store = Arc::new(Store::in_memory().unwrap());
        let task = seed_task(&store, "shadow/b-000002");
        store
            .set_scheduled_cleanup(&task.id, Some(Utc::now() + ChronoDuration::minutes(5)))
            .unwrap();

        let teardown = Arc::new(RecordingTeardown::default());
        let scheduler = CleanupScheduler::new(store.clone(), teardown.clone(), Duration::from_secs(60));
        assert_eq!(scheduler.sweep().await.unwrap(), 0);
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_teardown_leaves_schedule_for_retry() {
        let store = Arc::new(Store::in_memory().unwrap());
        let task = seed_task(&store, "shadow/c-000003");
        store
            .set_scheduled_cleanup(&task.id, Some(Utc::now() - ChronoDuration::minutes(1)))
            .unwrap();

        let teardown = Arc::new(RecordingTeardown::default());
        teardown.fail.store(true, Ordering::SeqCst);
        let scheduler = CleanupScheduler::new(store.clone(), teardown.clone(), Duration::from_secs(60));
        assert_eq!(scheduler.sweep().await.unwrap(), 0);

        // Schedule still set: the next sweep will retry.
        let task = store.get_task(&task.id).unwrap().unwrap();
        assert!(task.scheduled_cleanup_at.is_some());

        // Recovery: teardown succeeds on the retry.
        teardown.fail.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.sweep().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_is_idempotent_after_cleanup() {
        let store = Arc::new(Store::in_memory().unwrap());
        let task = seed_task(&store, "shadow/d-000004");
        store
            .set_scheduled_cleanup(&task.id, Some(Utc::now() - ChronoDuration::minutes(1)))
            .unwrap();
        let teardown = Arc::new(RecordingTeardown::default());
        let scheduler = CleanupScheduler::new(store.clone(), teardown.clone(), Duration::from_secs(60));
        scheduler.sweep().await.unwrap();
        // Second sweep finds nothing due.
        assert_eq!(scheduler.sweep().await.unwrap(), 0);
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 1);
    }
}
