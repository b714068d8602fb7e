// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "shadow-agent";

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub default_branch: String,
    pub clone_url: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub changed_files: u32,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    pub html_url: String,
    #[serde(default)]
    pub head: Option<PrRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comparison {
    pub ahead_by: u32,
    pub behind_by: u32,
    pub total_commits: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// Head branch (the task's shadow branch).
    pub head: String,
    /// Base branch the PR targets.
    pub base: String,
    pub draft: bool,
}

/// Minimal Octokit-style REST client scoped to one access token.
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: API_BASE.into(),
        }
    }

    /// Override the API base (tests, GitHub Enterprise).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: base_url.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        what: &str,
    ) -> anyhow::Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub {what} failed with {status}: {body}");
        }
        resp.json().await.with_context(|| format!("parsing {what}"))
    }

    pub async fn get_repository(&self, full_name: &str) -> anyhow::Result<Repository> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/repos/{full_name}"))
            .send()
            .await
            .context("GitHub repository request")?;
        Self::expect_json(resp, "repository fetch").await
    }

    pub async fn branch_exists(&self, full_name: &str, branch: &str) -> anyhow::Result<bool> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{full_name}/branches/{branch}"),
            )
            .send()
            .await
            .context("GitHub branch request")?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            s => bail!("GitHub branch check failed with {s}"),
        }
    }

    pub async fn compare(
        &self,
        full_name: &str,
        base: &str,
        head: &str,
    ) -> anyhow::Result<Comparison> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{full_name}/compare/{base}...{head}"),
            )
            .send()
            .await
            .context("GitHub compare request")?;
        Self::expect_json(resp, "branch compare").await
    }

    pub async fn create_pull_request(
        &self,
        full_name: &str,
        new: &NewPullRequest,
    ) -> anyhow::Result<PullRequest> {
        debug!(repo = %full_name, head = %new.head, base = %new.base, "creating pull request");
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{full_name}/pulls"))
            .json(new)
            .send()
            .await
            .context("GitHub PR create request")?;
        Self::expect_json(resp, "PR create").await
    }

    pub async fn update_pull_request(
        &self,
        full_name: &str,
        number: u64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> anyhow::Result<PullRequest> {
        let mut patch = json!({});
        if let Some(t) = title {
            patch["title"] = json!(t);
        }
        if let Some(b) = body {
            patch["body"] = json!(b);
        }
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{full_name}/pulls/{number}"),
            )
            .json(&patch)
            .send()
            .await
            .context("GitHub PR update request")?;
        Self::expect_json(resp, "PR update").await
    }

    pub async fn get_pull_request(
        &self,
        full_name: &str,
        number: u64,
    ) -> anyhow::Result<PullRequest> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{full_name}/pulls/{number}"),
            )
            .send()
            .await
            .context("GitHub PR fetch request")?;
        Self::expect_json(resp, "PR fetch").await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pull_request_serializes_draft_flag() {
        let pr = NewPullRequest {
            title: "Add health endpoint".into(),
            body: "adds /health".into(),
            head: "shadow/foo-abc123".into(),
            base: "main".into(),
            draft: true,
        };
        let v = serde_json::to_value(&pr).unwrap();
        assert_eq!(v["draft"], true);
        assert_eq!(v["head"], "shadow/foo-abc123");
    }

    #[test]
    fn pull_request_parses_with_missing_optional_fields() {
        let pr: PullRequest = serde_json::from_str(
            r#"{
                "number": 42,
                "title": "t",
                "state": "open",
                "html_url": "https://github.com/o/r/pull/42"
            }"#,
        )
        .unwrap();
        assert_eq!(pr.number, 42);
        assert!(!pr.merged);
        assert_eq!(pr.changed_files, 0);
    }

    #[test]
    fn comparison_parses_counts() {
        let c: Comparison = serde_json::from_str(
            r#"{"ahead_by": 2, "behind_by": 0, "total_commits": 2}"#,
        )
        .unwrap();
        assert_eq!(c.ahead_by, 2);
    }
}
