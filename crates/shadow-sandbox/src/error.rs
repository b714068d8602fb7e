// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Kubernetes API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("pod for task {0} not found")]
    NotFound(String),

    #[error("pod for task {task} entered Failed phase: {reason}")]
    PodFailed { task: String, reason: String },

    #[error("pod for task {task} not ready after {seconds}s")]
    ReadyTimeout { task: String, seconds: u64 },

    #[error("sandbox controller is not configured for remote mode")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
