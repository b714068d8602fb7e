// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Git worker: branch creation and publication, change detection, commits
//! with a co-author trailer, pushes, and diffs against a task workspace.
//!
//! Everything shells out to the `git` binary; the workspace directory is
//! owned by the task's sandbox and this worker is its only git client.
mod worker;

pub use worker::{CommitIdentity, GitWorker};
