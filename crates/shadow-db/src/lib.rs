// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent state for Shadow tasks.
//!
//! Holds the append-only message log (one dense sequence per task), the
//! task rows with their status machine fields, todo lists, pull-request
//! snapshots, and GitHub account tokens.  The kernel serializes writers per
//! task; the store backs that invariant with a `(task_id, sequence)` unique
//! index so a violation surfaces as a constraint error instead of silent
//! corruption.
mod parts;
mod store;
mod types;

pub use parts::*;
pub use store::{MessageUpdate, NewTask, Store};
pub use types::*;
