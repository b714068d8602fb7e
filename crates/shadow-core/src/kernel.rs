// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shadow_config::KernelConfig;
use shadow_db::{
    ChatMessage, InitStatus, MessageMeta, MessageRole, NewTask, Store, Task, TaskStatus, Todo,
    TodoStatus,
};
use shadow_github::{GitHubClient, TokenRefresher};
use shadow_model::{
    provider_for_context, ApiKeys, ContextService, Message, Operation, StreamProvider,
    TaskModelContext,
};
use shadow_tools::builtin::{builtin_registry, TodoSink};
use shadow_tools::{LocalExecutor, TodoItem, ToolEvent, WorkspaceExecutor};

use crate::{
    generate_commit_message, generate_task_title, ops::shadow_branch_for, CheckpointStore,
    EventBus, PrWorker, StreamOutcome, StreamProcessor, TaskEvent,
};
use crate::processor::StreamParams;

/// Grace period given to a cancelled stream before the pre-empting turn
/// proceeds.
const INTERRUPT_CLEANUP_WINDOW: Duration = Duration::from_millis(100);
/// Delay before a stacked child's first turn, letting its sandbox come up.
const STACKED_KICKOFF_DELAY: Duration = Duration::from_millis(250);

/// The single deferred user intent retained while a stream is active.
/// Newer always overwrites older.
#[derive(Debug, Clone)]
pub enum QueuedAction {
    Message {
        text: String,
        model: Option<String>,
    },
    StackedPr(StackedPrRequest),
}

#[derive(Debug, Clone)]
pub struct StackedPrRequest {
    pub text: String,
    pub model: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Queue behind an active stream instead of interrupting it.
    pub queue: bool,
    /// The user row already exists (edit / stacked seed); do not persist.
    pub skip_persist: bool,
    /// Switch the task to a different model for this and later turns.
    pub model_override: Option<String>,
    /// Tools off is used by bare one-shot turns (none in production flows).
    pub disable_tools: bool,
}

/// Per-task serialization record: cancellation handle, stop flag, queue
/// slot, and the turn mutex.  Held in a kernel-owned registry — never a
/// module-level global.
struct TaskState {
    turn_lock: tokio::sync::Mutex<()>,
    cancel: StdMutex<Option<CancellationToken>>,
    stop_requested: AtomicBool,
    streaming: AtomicBool,
    queued: StdMutex<Option<QueuedAction>>,
}

impl TaskState {
    fn new() -> Self {
        Self {
            turn_lock: tokio::sync::Mutex::new(()),
            cancel: StdMutex::new(None),
            stop_requested: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            queued: StdMutex::new(None),
        }
    }
}

/// Manufactures stream providers for a task context.  Swapped for a mock
/// factory in tests.
pub trait ProviderFactory: Send + Sync {
    fn provider(
        &self,
        ctx: &TaskModelContext,
        op: Operation,
    ) -> anyhow::Result<Arc<dyn StreamProvider>>;
}

pub struct LiveProviderFactory;

impl ProviderFactory for LiveProviderFactory {
    fn provider(
        &self,
        ctx: &TaskModelContext,
        op: Operation,
    ) -> anyhow::Result<Arc<dyn StreamProvider>> {
        provider_for_context(ctx, op)
    }
}

/// Manufactures workspace executors for a task.
pub trait ExecutorFactory: Send + Sync {
    fn executor(&self, task: &Task) -> anyhow::Result<Arc<dyn WorkspaceExecutor>>;

    /// Local workspace directory, when one exists on this host.
    fn workspace_path(&self, _task: &Task) -> Option<PathBuf> {
        None
    }
}

/// Local-mode factory: one directory per task under a base dir.
pub struct LocalExecutorFactory {
    base: PathBuf,
}

impl LocalExecutorFactory {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ExecutorFactory for LocalExecutorFactory {
    fn executor(&self, task: &Task) -> anyhow::Result<Arc<dyn WorkspaceExecutor>> {
        let path = self
            .workspace_path(task)
            .expect("local factory always has a workspace path");
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating workspace {}", path.display()))?;
        Ok(Arc::new(LocalExecutor::new(path)))
    }

    fn workspace_path(&self, task: &Task) -> Option<PathBuf> {
        match &task.workspace_path {
            Some(p) => Some(PathBuf::from(p)),
            None => Some(self.base.join(&task.id)),
        }
    }
}

/// The task stream kernel (see crate docs).
pub struct TaskKernel {
    store: Arc<Store>,
    config: KernelConfig,
    contexts: Arc<ContextService>,
    events: Arc<EventBus>,
    providers: Arc<dyn ProviderFactory>,
    executors: Arc<dyn ExecutorFactory>,
    checkpoints: Arc<dyn CheckpointStore>,
    refresher: Option<Arc<TokenRefresher>>,
    tasks: DashMap<String, Arc<TaskState>>,
}

impl TaskKernel {
    pub fn new(
        store: Arc<Store>,
        config: KernelConfig,
        contexts: Arc<ContextService>,
        events: Arc<EventBus>,
        providers: Arc<dyn ProviderFactory>,
        executors: Arc<dyn ExecutorFactory>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            store,
            config,
            contexts,
            events,
            providers,
            executors,
            checkpoints,
            refresher: None,
            tasks: DashMap::new(),
        }
    }

    pub fn with_token_refresher(mut self, refresher: Arc<TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn state(&self, task_id: &str) -> Arc<TaskState> {
        self.tasks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(TaskState::new()))
            .clone()
    }

    fn api_keys(&self) -> ApiKeys {
        ApiKeys {
            anthropic: std::env::var("ANTHROPIC_API_KEY").ok(),
            openai: std::env::var("OPENAI_API_KEY").ok(),
        }
    }

    // ── Public operations ─────────────────────────────────────────────────────

    /// Run one user turn: follow-up logic, queue-or-interrupt, persistence,
    /// history assembly, the stream itself, terminal transition, completion
    /// side-effects, and the queued-action drain.
    pub async fn process_user_message(
        self: &Arc<Self>,
        task_id: &str,
        text: &str,
        opts: ProcessOptions,
    ) -> anyhow::Result<()> {
        let state = self.state(task_id);
        let task = self
            .store
            .get_task(task_id)?
            .with_context(|| format!("no such task: {task_id}"))?;

        // Follow-up logic: a message against an inactive task cancels any
        // pending cleanup and requests re-initialization.
        if task.init_status == InitStatus::Inactive {
            self.store.set_scheduled_cleanup(task_id, None)?;
            if task.status != TaskStatus::Initializing
                && task.status.can_transition(TaskStatus::Initializing)
            {
                self.store
                    .set_task_status(task_id, TaskStatus::Initializing)?;
            }
            // The external initialization pipeline observes the transition;
            // the kernel records that the workspace is wanted again.
            self.store.set_init_status(task_id, InitStatus::Active)?;
        }

        if state.streaming.load(Ordering::SeqCst) {
            if opts.queue {
                debug!(task = %task_id, "stream active; queueing message");
                *state.queued.lock().unwrap() = Some(QueuedAction::Message {
                    text: text.to_string(),
                    model: opts.model_override.clone(),
                });
                return Ok(());
            }
            self.interrupt(&state).await;
        }

        let _turn = state.turn_lock.lock().await;

        let ctx = match &opts.model_override {
            Some(model) => self.contexts.create(task_id, model, self.api_keys()),
            None => self
                .contexts
                .get(task_id)
                .unwrap_or_else(|| self.contexts.create(task_id, &task.main_model, self.api_keys())),
        };

        if !opts.skip_persist {
            self.store.append_message(
                task_id,
                MessageRole::User,
                text,
                ctx.main_model(),
                MessageMeta::default(),
            )?;
        }

        // Stream start: RUNNING, and no cleanup may fire underneath us.
        let current = self.store.get_task(task_id)?.context("task vanished")?;
        if current.status != TaskStatus::Running
            && current.status.can_transition(TaskStatus::Running)
        {
            self.store.set_task_status(task_id, TaskStatus::Running)?;
        }
        self.store.set_scheduled_cleanup(task_id, None)?;

        // First-turn bootstrap: persist the repo-overview system message so
        // future turns skip it.  Protected by the per-task serial invariant.
        let rows = self.store.history(task_id)?;
        if !rows.iter().any(|m| m.role == MessageRole::System) {
            let overview = repo_overview(&task);
            self.store.append_message(
                task_id,
                MessageRole::System,
                &overview,
                ctx.main_model(),
                MessageMeta::default(),
            )?;
        }
        let rows = self.store.history(task_id)?;
        let (system, history) = build_history(&rows);

        // Wire up the tool surface for this stream.
        let task = self.store.get_task(task_id)?.context("task vanished")?;
        if task.workspace_path.is_none() {
            if let Some(path) = self.executors.workspace_path(&task) {
                self.store
                    .set_workspace_path(task_id, Some(&path.to_string_lossy()))?;
            }
        }
        let task = self.store.get_task(task_id)?.context("task vanished")?;
        let executor = self.executors.executor(&task)?;
        let (tool_tx, tool_rx) = tokio::sync::mpsc::unbounded_channel();
        self.spawn_tool_event_forwarder(task_id, tool_rx);
        let registry = Arc::new(builtin_registry(
            executor.clone(),
            tool_tx,
            Arc::new(StoreTodoSink {
                store: self.store.clone(),
                task_id: task_id.to_string(),
            }),
        ));

        let provider = self.providers.provider(&ctx, Operation::MainAgent)?;
        let processor = StreamProcessor::new(self.store.clone(), registry, self.events.clone());

        let cancel = CancellationToken::new();
        *state.cancel.lock().unwrap() = Some(cancel.clone());
        // A stop that raced in between the queue check and here still wins:
        // the stream aborts at its first chunk boundary.
        if state.stop_requested.swap(false, Ordering::SeqCst) {
            cancel.cancel();
        }
        state.streaming.store(true, Ordering::SeqCst);

        let outcome = processor
            .run(StreamParams {
                task_id: task_id.to_string(),
                model: ctx.main_model().to_string(),
                provider,
                system,
                history,
                cancel,
                enable_tools: !opts.disable_tools,
            })
            .await;

        state.streaming.store(false, Ordering::SeqCst);
        *state.cancel.lock().unwrap() = None;
        // The stop (or interrupt) that ended this stream is consumed here,
        // while the turn lock is still held, so the next turn starts clean.
        state.stop_requested.store(false, Ordering::SeqCst);

        match outcome {
            Ok(StreamOutcome::Completed { message_id, .. }) => {
                self.store.set_task_status(task_id, TaskStatus::Completed)?;
                self.schedule_cleanup(task_id)?;
                self.completion_side_effects(&task, &ctx, &executor, &message_id)
                    .await;
            }
            Ok(StreamOutcome::Stopped { .. }) => {
                info!(task = %task_id, "stream stopped");
                self.store.set_task_status(task_id, TaskStatus::Stopped)?;
                self.schedule_cleanup(task_id)?;
            }
            Ok(StreamOutcome::Errored { message, .. }) => {
                warn!(task = %task_id, error = %message, "stream failed");
                self.store.set_task_status(task_id, TaskStatus::Failed)?;
                self.schedule_cleanup(task_id)?;
                *state.queued.lock().unwrap() = None;
            }
            Err(e) => {
                // Infrastructure failure (e.g. the database): FAILED, then
                // surface to the caller.
                let _ = self.store.set_task_status(task_id, TaskStatus::Failed);
                let _ = self.schedule_cleanup(task_id);
                *state.queued.lock().unwrap() = None;
                return Err(e);
            }
        }

        drop(_turn);
        self.drain_queue(task_id).await
    }

    /// Mark stop-requested and cancel the in-flight stream.  The running
    /// turn performs the STOPPED transition when its fold exits.
    pub async fn stop_stream(&self, task_id: &str) -> anyhow::Result<()> {
        let state = self.state(task_id);
        state.stop_requested.store(true, Ordering::SeqCst);
        let had_stream = {
            let guard = state.cancel.lock().unwrap();
            if let Some(cancel) = guard.as_ref() {
                cancel.cancel();
                true
            } else {
                false
            }
        };
        if !had_stream {
            let task = self
                .store
                .get_task(task_id)?
                .with_context(|| format!("no such task: {task_id}"))?;
            if task.status == TaskStatus::Running {
                self.store.set_task_status(task_id, TaskStatus::Stopped)?;
                self.schedule_cleanup(task_id)?;
            }
        }
        Ok(())
    }

    /// Edit a prior user message: stop the stream, restore the workspace
    /// checkpoint from before that turn, truncate the tail, resubmit.
    pub async fn edit_user_message(
        self: &Arc<Self>,
        task_id: &str,
        message_id: &str,
        new_text: &str,
        new_model: Option<String>,
    ) -> anyhow::Result<()> {
        let state = self.state(task_id);
        if state.streaming.load(Ordering::SeqCst) {
            self.interrupt(&state).await;
        }
        *state.queued.lock().unwrap() = None;

        let edited = {
            let _turn = state.turn_lock.lock().await;
            let msg = self
                .store
                .get_message(message_id)?
                .with_context(|| format!("no such message: {message_id}"))?;
            if msg.task_id != task_id {
                anyhow::bail!("message {message_id} does not belong to task {task_id}");
            }
            if msg.role != MessageRole::User {
                anyhow::bail!("only user messages can be edited");
            }

            // Restore the checkpoint of the assistant turn preceding the
            // edited message, so the workspace matches the state before it.
            let task = self.store.get_task(task_id)?.context("task vanished")?;
            if let Some(workspace) = self
                .executors
                .workspace_path(&task)
                .filter(|p| p.exists())
            {
                let rows = self.store.history(task_id)?;
                let prior_assistant = rows
                    .iter()
                    .filter(|m| m.role == MessageRole::Assistant && m.sequence < msg.sequence)
                    .last();
                if let Some(prior) = prior_assistant {
                    match self
                        .checkpoints
                        .restore(task_id, &prior.id, &workspace)
                        .await
                    {
                        Ok(true) => debug!(task = %task_id, "workspace checkpoint restored"),
                        Ok(false) => {}
                        Err(e) => warn!(task = %task_id, error = %e, "checkpoint restore failed"),
                    }
                }
            }

            self.store.update_message(
                message_id,
                shadow_db::MessageUpdate {
                    content: Some(new_text.to_string()),
                    mark_edited: true,
                    ..Default::default()
                },
            )?;
            self.store.truncate_after(task_id, msg.sequence)?;
            msg
        };
        debug!(task = %task_id, sequence = edited.sequence, "message edited; resubmitting");

        self.process_user_message(
            task_id,
            new_text,
            ProcessOptions {
                queue: false,
                skip_persist: true,
                model_override: new_model,
                disable_tools: false,
            },
        )
        .await
    }

    /// Create a dependent task whose base branch is this task's working
    /// branch, or queue the request while a stream is active.
    pub async fn create_stacked_pr(
        self: &Arc<Self>,
        parent_task_id: &str,
        request: StackedPrRequest,
        queue: bool,
    ) -> anyhow::Result<Option<Task>> {
        let state = self.state(parent_task_id);
        if queue && state.streaming.load(Ordering::SeqCst) {
            debug!(task = %parent_task_id, "stream active; queueing stacked PR");
            *state.queued.lock().unwrap() = Some(QueuedAction::StackedPr(request));
            return Ok(None);
        }

        let parent = self
            .store
            .get_task(parent_task_id)?
            .with_context(|| format!("no such task: {parent_task_id}"))?;

        let parent_ctx = self.contexts.get(parent_task_id);
        let mini = parent_ctx
            .as_ref()
            .and_then(|ctx| self.providers.provider(ctx, Operation::TaskTitle).ok());
        let title = generate_task_title(mini, &request.text).await;
        let shadow_branch = shadow_branch_for(&title);

        let child = self.store.create_task(NewTask {
            repo_full_name: parent.repo_full_name.clone(),
            repo_url: parent.repo_url.clone(),
            // The whole point of stacking: the child bases on the parent's
            // working branch.
            base_branch: parent.shadow_branch.clone(),
            shadow_branch,
            user_id: request.user_id.clone(),
            main_model: request.model.clone(),
            title,
        })?;

        // Seed the child's first user message at sequence 1.
        self.store.append_message(
            &child.id,
            MessageRole::User,
            &request.text,
            &request.model,
            MessageMeta::default(),
        )?;

        // Parent-side placeholder row pointing at the child; excluded from
        // prompt history.
        let reference = self.store.append_message(
            parent_task_id,
            MessageRole::User,
            &format!("Created stacked task: {}", child.title),
            &request.model,
            MessageMeta::default(),
        )?;
        self.store.update_message(
            &reference.id,
            shadow_db::MessageUpdate {
                stacked_task_id: Some(child.id.clone()),
                ..Default::default()
            },
        )?;

        if let Some(ctx) = parent_ctx {
            self.contexts.copy_context(&child.id, &ctx);
        }

        info!(parent = %parent_task_id, child = %child.id, "stacked task created");

        // Kick off the child's first turn after a short delay so its
        // sandbox can come up.
        let kernel = Arc::clone(self);
        let child_id = child.id.clone();
        let text = request.text;
        tokio::spawn(async move {
            tokio::time::sleep(STACKED_KICKOFF_DELAY).await;
            let opts = ProcessOptions {
                skip_persist: true,
                ..Default::default()
            };
            if let Err(e) = kernel.process_user_message(&child_id, &text, opts).await {
                warn!(task = %child_id, error = %e, "stacked task first turn failed");
            }
        });

        Ok(Some(child))
    }

    /// Forget a task's in-memory state: cancel any live stream, drop the
    /// queued action, release the event channel.
    pub async fn cleanup_task(&self, task_id: &str) {
        if let Some((_, state)) = self.tasks.remove(task_id) {
            if let Some(cancel) = state.cancel.lock().unwrap().take() {
                cancel.cancel();
            }
            *state.queued.lock().unwrap() = None;
        }
        self.contexts.invalidate(task_id);
        self.events.forget(task_id);
        debug!(task = %task_id, "task state forgotten");
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn interrupt(&self, state: &TaskState) {
        debug!("interrupting active stream");
        state.stop_requested.store(true, Ordering::SeqCst);
        if let Some(cancel) = state.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        *state.queued.lock().unwrap() = None;
        tokio::time::sleep(INTERRUPT_CLEANUP_WINDOW).await;
    }

    fn schedule_cleanup(&self, task_id: &str) -> anyhow::Result<()> {
        let at = Utc::now() + ChronoDuration::minutes(self.config.cleanup_delay_minutes);
        self.store.set_scheduled_cleanup(task_id, Some(at))
    }

    fn spawn_tool_event_forwarder(
        &self,
        task_id: &str,
        mut rx: tokio::sync::mpsc::UnboundedReceiver<ToolEvent>,
    ) {
        let events = self.events.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ToolEvent::TodoUpdate(todos) => {
                        events.emit(&task_id, TaskEvent::TodoUpdate { todos })
                    }
                    ToolEvent::Terminal(entry) => {
                        events.emit(&task_id, TaskEvent::TerminalOutput { entry })
                    }
                }
            }
        });
    }

    /// Commit → push → PR → checkpoint.  Everything here degrades
    /// gracefully: a side-effect failure never retroactively fails the
    /// completed task.
    async fn completion_side_effects(
        &self,
        task: &Task,
        ctx: &TaskModelContext,
        executor: &Arc<dyn WorkspaceExecutor>,
        message_id: &str,
    ) {
        self.commit_if_any(task, ctx, executor).await;

        if self.config.auto_pull_request {
            match self.github_client_for(&task.user_id).await {
                Some(github) => {
                    let mini = self.providers.provider(ctx, Operation::PrText).ok();
                    let worker = PrWorker::new(self.store.clone());
                    // Refreshed task row: the commit stage may have set fields.
                    let task = match self.store.get_task(&task.id) {
                        Ok(Some(t)) => t,
                        _ => task.clone(),
                    };
                    if let Err(e) = worker
                        .create_or_update(&task, executor, &github, mini, message_id)
                        .await
                    {
                        warn!(task = %task.id, error = %e, "PR stage failed");
                    }
                }
                None => debug!(task = %task.id, "no GitHub account; skipping PR stage"),
            }
        }

        if self.config.checkpoints {
            if let Some(workspace) = self
                .executors
                .workspace_path(task)
                .filter(|p| p.exists())
            {
                if let Err(e) = self
                    .checkpoints
                    .take(&task.id, message_id, &workspace)
                    .await
                {
                    warn!(task = %task.id, error = %e, "checkpoint failed");
                }
            }
        }
    }

    async fn commit_if_any(
        &self,
        task: &Task,
        ctx: &TaskModelContext,
        executor: &Arc<dyn WorkspaceExecutor>,
    ) {
        let status = executor.git_status().await;
        let has_changes = status
            .data
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_changes {
            debug!(task = %task.id, "no workspace changes; skipping commit");
            return;
        }

        let diff = executor.git_diff(None).await.data.unwrap_or_default();
        let mini = self.providers.provider(ctx, Operation::CommitMessage).ok();
        let message = generate_commit_message(mini, &diff).await;

        let (co_name, co_email) = match self.store.get_account(&task.user_id) {
            Ok(Some(account)) => (account.github_login, account.email),
            _ => (
                task.user_id.clone(),
                format!("{}@users.noreply.github.com", task.user_id),
            ),
        };

        let commit = executor.git_commit(&message, &co_name, &co_email).await;
        if !commit.success {
            warn!(task = %task.id, error = ?commit.error, "commit failed");
            return;
        }
        info!(task = %task.id, sha = ?commit.data, "changes committed");

        // Push failure is logged, never propagated.
        let push = executor.git_push(&task.shadow_branch, true).await;
        if !push.success {
            warn!(task = %task.id, error = ?push.error, "push failed; branch remains local");
        }
    }

    /// GitHub client for the task owner, refreshing the OAuth token when it
    /// is inside the expiry headroom.
    async fn github_client_for(&self, user_id: &str) -> Option<GitHubClient> {
        let account = self.store.get_account(user_id).ok().flatten()?;
        let mut token = account.access_token.clone();
        if TokenRefresher::needs_refresh(account.access_token_expires_at, Utc::now()) {
            if let (Some(refresher), Some(refresh_token)) =
                (&self.refresher, &account.refresh_token)
            {
                match refresher.refresh(refresh_token).await {
                    Ok(refreshed) => {
                        token = refreshed.access_token.clone();
                        let updated = shadow_db::Account {
                            access_token: refreshed.access_token,
                            refresh_token: refreshed
                                .refresh_token
                                .or(account.refresh_token.clone()),
                            access_token_expires_at: refreshed.expires_at,
                            ..account
                        };
                        if let Err(e) = self.store.upsert_account(&updated) {
                            warn!(user = %user_id, error = %e, "persisting refreshed token failed");
                        }
                    }
                    Err(e) => warn!(user = %user_id, error = %e, "token refresh failed"),
                }
            }
        }
        Some(GitHubClient::new(token))
    }

    /// Process the single queued action after a terminal transition.
    ///
    /// Returns an explicitly boxed future (rather than being an `async fn`)
    /// because this recurses into `process_user_message`, which itself
    /// awaits this function; naming the concrete `Pin<Box<dyn Future>>`
    /// type here breaks the opaque-type cycle that recursion would
    /// otherwise create.
    fn drain_queue<'a>(
        self: &'a Arc<Self>,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state(task_id);
            let action = state.queued.lock().unwrap().take();
            match action {
                None => Ok(()),
                Some(QueuedAction::Message { text, model }) => {
                    debug!(task = %task_id, "draining queued message");
                    self.process_user_message(
                        task_id,
                        &text,
                        ProcessOptions {
                            queue: false,
                            skip_persist: false,
                            model_override: model,
                            disable_tools: false,
                        },
                    )
                    .await
                }
                Some(QueuedAction::StackedPr(request)) => {
                    debug!(task = %task_id, "draining queued stacked PR");
                    self.create_stacked_pr(task_id, request, false)
                        .await
                        .map(|_| ())
                }
            }
        })
    }
}

/// Adapts the todo tool's sink onto the store.
struct StoreTodoSink {
    store: Arc<Store>,
    task_id: String,
}

impl TodoSink for StoreTodoSink {
    fn write(&self, items: Vec<TodoItem>, merge: bool) -> anyhow::Result<Vec<TodoItem>> {
        let todos: Vec<Todo> = items
            .into_iter()
            .map(|item| Todo {
                status: TodoStatus::parse(&item.status).unwrap_or(TodoStatus::Pending),
                id: item.id,
                task_id: self.task_id.clone(),
                content: item.content,
                sequence: item.sequence,
            })
            .collect();
        self.store.write_todos(&self.task_id, &todos, merge)?;
        Ok(self
            .store
            .todos(&self.task_id)?
            .into_iter()
            .map(|t| TodoItem {
                id: t.id,
                content: t.content,
                status: t.status.as_str().to_string(),
                sequence: t.sequence,
            })
            .collect())
    }
}

/// System message generated on a task's first turn.
fn repo_overview(task: &Task) -> String {
    format!(
        "You are working in a clone of {repo} on branch {branch} (based on {base}). \
         Make focused changes; the platform commits and opens a pull request for you \
         when your turn ends.",
        repo = task.repo_full_name,
        branch = task.shadow_branch,
        base = task.base_branch,
    )
}

/// Assemble the provider history from the persisted rows: system rows feed
/// the system prompt, stacked-child placeholders are excluded, assistant
/// rows are expanded from their structured parts.
fn build_history(rows: &[ChatMessage]) -> (Option<String>, Vec<Message>) {
    let mut system_sections: Vec<&str> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();
    for row in rows {
        match row.role {
            MessageRole::System => system_sections.push(&row.content),
            MessageRole::User => {
                if row.stacked_task_id.is_some() {
                    continue;
                }
                messages.push(Message::user(&row.content));
            }
            MessageRole::Assistant => {
                if row.meta.parts.is_empty() {
                    if !row.content.is_empty() {
                        messages.push(Message::assistant(&row.content));
                    }
                    continue;
                }
                for part in &row.meta.parts {
                    match part {
                        shadow_db::MessagePart::Text { text } => {
                            if !text.is_empty() {
                                messages.push(Message::assistant(text));
                            }
                        }
                        shadow_db::MessagePart::ToolCall { id, name, args } => {
                            messages.push(Message::tool_call(id, name, args.clone()));
                        }
                        shadow_db::MessagePart::ToolResult { id, result, .. } => {
                            messages.push(Message::tool_result(id, result.clone()));
                        }
                        // Reasoning and error parts are display-only.
                        _ => {}
                    }
                }
            }
            MessageRole::Tool => {}
        }
    }
    let system = if system_sections.is_empty() {
        None
    } else {
        Some(system_sections.join("\n\n"))
    };
    (system, messages)
}
