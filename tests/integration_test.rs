// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Full-stack integration: a task flows from user message through the
/// stream kernel to a persisted transcript, then is archived by the
/// PR-closed transition.  Uses the scripted mock provider; no network.
use std::sync::Arc;

use shadow_config::KernelConfig;
use shadow_core::{
    EventBus, FsCheckpointStore, LocalExecutorFactory, ProcessOptions, ProviderFactory,
    TaskEvent, TaskKernel,
};
use shadow_db::{MessageRole, NewTask, Store, TaskStatus};
use shadow_model::{
    ContextService, FinishReason, MockProvider, Operation, StreamChunk, StreamProvider,
    TaskModelContext,
};

struct FixedProviderFactory(Arc<MockProvider>);

impl ProviderFactory for FixedProviderFactory {
    fn provider(
        &self,
        _ctx: &TaskModelContext,
        _op: Operation,
    ) -> anyhow::Result<Arc<dyn StreamProvider>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn task_lifecycle_from_message_to_archive() {
    let store = Arc::new(Store::in_memory().unwrap());
    let task = store
        .create_task(NewTask {
            repo_full_name: "octo/repo".into(),
            repo_url: "https://github.com/octo/repo.git".into(),
            base_branch: "main".into(),
            shadow_branch: "shadow/health-abc123".into(),
            user_id: "user-1".into(),
            main_model: "claude-sonnet-4-5".into(),
            title: "add health endpoint".into(),
        })
        .unwrap();

    let provider = Arc::new(MockProvider::new("mock"));
    provider.script_stream(vec![
        StreamChunk::Reasoning("planning".into()),
        StreamChunk::ReasoningSignature("sig".into()),
        StreamChunk::TextDelta("Added the endpoint.".into()),
        StreamChunk::Finish(FinishReason::Stop),
    ]);

    let workspaces = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    let events = Arc::new(EventBus::new());
    let kernel = Arc::new(TaskKernel::new(
        store.clone(),
        KernelConfig::default(),
        Arc::new(ContextService::default()),
        events.clone(),
        Arc::new(FixedProviderFactory(provider)),
        Arc::new(LocalExecutorFactory::new(workspaces.path())),
        Arc::new(FsCheckpointStore::new(checkpoints.path())),
    ));

    // Watch the wire protocol while the stream runs.
    let mut rx = events.subscribe(&task.id);

    kernel
        .process_user_message(&task.id, "add a health endpoint", ProcessOptions::default())
        .await
        .unwrap();

    // Terminal state with cleanup scheduled.
    let done = store.get_task(&task.id).unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.scheduled_cleanup_at.is_some());

    // Transcript: user, bootstrap system, assistant with sealed reasoning.
    let rows = store.history(&task.id).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].role, MessageRole::Assistant);
    assert_eq!(rows[2].content, "Added the endpoint.");
    assert!(rows[2].meta.parts_are_consistent());

    // The channel carried reasoning, content, and completion events.
    let mut saw_reasoning = false;
    let mut saw_complete = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            TaskEvent::Reasoning { .. } => saw_reasoning = true,
            TaskEvent::Complete { finish_reason } => {
                saw_complete = true;
                assert_eq!(finish_reason, "stop");
            }
            _ => {}
        }
    }
    assert!(saw_reasoning && saw_complete);

    // PR closed ⇒ archived, and archiving is terminal.
    store.set_pull_request_number(&task.id, 7).unwrap();
    let archived = store.archive_tasks_for_pr("octo/repo", 7).unwrap();
    assert_eq!(archived, vec![task.id.clone()]);
    assert!(store
        .set_task_status(&task.id, TaskStatus::Running)
        .is_err());
}
