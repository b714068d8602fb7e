// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sandbox lifecycle controller: provision, observe readiness, address,
//! and tear down a per-task pod — plus the HTTP client for the pod's
//! tool-executor sidecar.
mod controller;
mod error;
mod remote;

pub use controller::{PodPhase, PodStatus, SandboxController, TaskPodSpec};
pub use error::SandboxError;
pub use remote::RemoteExecutor;
