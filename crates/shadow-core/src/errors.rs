// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! User-visible normalization of provider error strings.

/// Rewrite raw provider errors into text fit for the task transcript.
///
/// Rate-limit and repeated-retry errors come back from providers as JSON
/// blobs or SDK internals; the transcript should carry a sentence, not a
/// stack dump.  Unrecognized errors pass through unchanged.
pub fn normalize_provider_error(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("429")
        || lower.contains("overloaded")
    {
        return "The model provider is currently rate-limited. Please wait a moment and send \
                your message again."
            .to_string();
    }
    if lower.contains("exceeded your current quota") || lower.contains("insufficient_quota") {
        return "The configured API key has run out of quota. Update the key in settings and \
                try again."
            .to_string();
    }
    if lower.contains("retries exhausted") || lower.contains("max retries") {
        return "The model provider failed repeatedly and the request was abandoned. Please try \
                again."
            .to_string();
    }
    raw.to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_are_rewritten() {
        let out = normalize_provider_error("Anthropic error 429: {\"type\":\"rate_limit_error\"}");
        assert!(out.contains("rate-limited"));
        assert!(!out.contains("429"));
    }

    #[test]
    fn overloaded_errors_are_rewritten() {
        let out = normalize_provider_error("Overloaded");
        assert!(out.contains("rate-limited"));
    }

    #[test]
    fn retry_exhaustion_is_rewritten() {
        let out = normalize_provider_error("max retries reached for request");
        assert!(out.contains("failed repeatedly"));
    }

    #[test]
    fn unknown_errors_pass_through() {
        assert_eq!(
            normalize_provider_error("something specific broke"),
            "something specific broke"
        );
    }
}
