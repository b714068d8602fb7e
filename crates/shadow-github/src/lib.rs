// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! GitHub integration: REST client for repositories and pull requests,
//! OAuth token refresh with expiry headroom, and webhook signature
//! verification.
mod client;
mod tokens;
mod webhook;

pub use client::{Comparison, GitHubClient, NewPullRequest, PrRef, PullRequest, Repository};
pub use tokens::{RefreshedToken, TokenRefresher, TOKEN_EXPIRY_HEADROOM_SECS};
pub use webhook::{verify_signature, PullRequestClosed};
