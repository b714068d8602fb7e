// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a GitHub webhook signature header (`sha256=<hex>`) against the
/// raw request body.  Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.ct_eq(&expected).into()
}

/// The one webhook event the kernel cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestClosed {
    pub repo_full_name: String,
    pub number: u64,
    pub merged: bool,
}

impl PullRequestClosed {
    /// Extract a `pull_request.closed` event from a webhook payload.
    /// Returns `None` for every other action (acknowledged and ignored).
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if payload["action"].as_str() != Some("closed") {
            return None;
        }
        let number = payload["pull_request"]["number"].as_u64()?;
        let repo_full_name = payload["repository"]["full_name"].as_str()?.to_string();
        Some(Self {
            repo_full_name,
            number,
            merged: payload["pull_request"]["merged"].as_bool().unwrap_or(false),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"action":"closed"}"#;
        let header = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &header));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = br#"{"action":"closed"}"#;
        let header = sign("topsecret", body);
        assert!(!verify_signature("other", body, &header));
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign("topsecret", br#"{"action":"closed"}"#);
        assert!(!verify_signature("topsecret", br#"{"action":"opened"}"#, &header));
    }

    #[test]
    fn missing_prefix_or_bad_hex_fails() {
        let body = b"x";
        assert!(!verify_signature("s", body, "deadbeef"));
        assert!(!verify_signature("s", body, "sha256=zznothex"));
        assert!(!verify_signature("s", body, ""));
    }

    #[test]
    fn closed_event_parses() {
        let payload = json!({
            "action": "closed",
            "pull_request": { "number": 42, "merged": true },
            "repository": { "full_name": "o/r" },
        });
        assert_eq!(
            PullRequestClosed::from_payload(&payload),
            Some(PullRequestClosed {
                repo_full_name: "o/r".into(),
                number: 42,
                merged: true,
            })
        );
    }

    #[test]
    fn other_actions_are_ignored() {
        let payload = json!({
            "action": "opened",
            "pull_request": { "number": 1 },
            "repository": { "full_name": "o/r" },
        });
        assert_eq!(PullRequestClosed::from_payload(&payload), None);
    }

    #[test]
    fn malformed_payload_is_none() {
        assert_eq!(PullRequestClosed::from_payload(&json!({"action": "closed"})), None);
    }
}
