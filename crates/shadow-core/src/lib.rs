// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The task stream kernel.
//!
//! Owns the in-flight LLM stream and its cancellation, folds provider
//! chunks into durable structured messages, queues or pre-empts follow-up
//! user actions, drives commit → push → PR on successful completion, and
//! spawns stacked child tasks.  Strictly serial per task; parallel across
//! tasks.
mod checkpoint;
mod cleanup;
mod errors;
mod events;
mod fold;
mod kernel;
mod ops;
mod pr;
mod processor;

pub use checkpoint::{CheckpointStore, FsCheckpointStore, NullCheckpointStore};
pub use cleanup::{CleanupScheduler, SandboxTeardown};
pub use errors::normalize_provider_error;
pub use events::{EventBus, TaskEvent};
pub use fold::MessageFold;
pub use kernel::{
    ExecutorFactory, LiveProviderFactory, LocalExecutorFactory, ProcessOptions, ProviderFactory,
    QueuedAction, StackedPrRequest, TaskKernel,
};
pub use ops::{
    generate_commit_message, generate_pr_text, generate_task_title, shadow_branch_for, PrText,
};
pub use pr::PrWorker;
pub use processor::{StreamOutcome, StreamProcessor};
