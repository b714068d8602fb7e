// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool executor interface and the LLM-facing tool surface.
//!
//! One [`WorkspaceExecutor`] contract covers file, search, shell, and git
//! operations against a task workspace.  Two implementations exist: the
//! local executor in this crate and the remote sidecar client in
//! `shadow-sandbox`.  Failures are values ([`ExecOutcome`]) — they never
//! cross the interface as errors.
pub mod builtin;
mod events;
mod executor;
mod local;
mod registry;
mod tool;
mod validate;

pub use events::{TerminalEntry, TerminalEntryKind, TodoItem, ToolEvent, ToolEventSender};
pub use executor::*;
pub use local::LocalExecutor;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall};
pub use validate::{
    is_mcp_tool, validate_args_shape, validate_result_shape, MCP_RESULT_MAX_BYTES,
};
