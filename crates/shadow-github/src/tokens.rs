// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

/// Refresh tokens this long before they actually expire, so an in-flight
/// stream never loses its credential mid-push.
pub const TOKEN_EXPIRY_HEADROOM_SECS: i64 = 300;

fn headroom() -> Duration {
    Duration::seconds(TOKEN_EXPIRY_HEADROOM_SECS)
}

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OauthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Refreshes GitHub OAuth access tokens.
pub struct TokenRefresher {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl TokenRefresher {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: "https://github.com/login/oauth/access_token".into(),
        }
    }

    /// True when the token is missing an expiry (treat as fresh) or expires
    /// within the headroom window.
    pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match expires_at {
            Some(at) => at - now <= headroom(),
            None => false,
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> anyhow::Result<RefreshedToken> {
        let now = Utc::now();
        let resp = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .context("GitHub token refresh request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GitHub token refresh failed with {status}");
        }
        let body: OauthResponse = resp.json().await.context("token refresh parse")?;
        if let Some(err) = body.error {
            bail!(
                "GitHub token refresh rejected: {err} {}",
                body.error_description.unwrap_or_default()
            );
        }
        let access_token = body
            .access_token
            .context("token refresh response missing access_token")?;
        debug!("GitHub access token refreshed");
        Ok(RefreshedToken {
            access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_in.map(|secs| now + Duration::seconds(secs)),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_with_plenty_of_life_does_not_refresh() {
        let now = Utc::now();
        assert!(!TokenRefresher::needs_refresh(
            Some(now + Duration::hours(1)),
            now
        ));
    }

    #[test]
    fn token_inside_headroom_refreshes() {
        let now = Utc::now();
        assert!(TokenRefresher::needs_refresh(
            Some(now + Duration::minutes(4)),
            now
        ));
        assert!(TokenRefresher::needs_refresh(
            Some(now - Duration::minutes(1)),
            now
        ));
    }

    #[test]
    fn token_without_expiry_is_treated_as_fresh() {
        assert!(!TokenRefresher::needs_refresh(None, Utc::now()));
    }

    #[test]
    fn exact_headroom_boundary_refreshes() {
        let now = Utc::now();
        assert!(TokenRefresher::needs_refresh(
            Some(now + Duration::seconds(TOKEN_EXPIRY_HEADROOM_SECS)),
            now
        ));
    }
}
