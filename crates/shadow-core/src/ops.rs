// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mini-model text generators: task title, working-branch slug, commit
//! message, and PR title/description.  Every generator degrades to a
//! static fallback when no provider is available or the call fails —
//! side-effect text must never block a completed stream.

use std::sync::Arc;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use shadow_model::{Message, StreamProvider, StreamRequest};

/// Commit subjects are conventional-length: imperative, 50 chars max.
pub const MAX_COMMIT_SUBJECT: usize = 50;
/// Diffs are clipped before prompting so one huge change cannot blow the
/// mini model's context.
const MAX_DIFF_PROMPT_BYTES: usize = 20_000;

const FALLBACK_COMMIT_MESSAGE: &str = "Update workspace files";
const FALLBACK_PR_TITLE: &str = "Shadow task changes";

fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Truncate to the commit-subject budget on a char boundary.
fn clamp_subject(subject: &str) -> String {
    let line = subject.lines().next().unwrap_or("").trim();
    clip(line, MAX_COMMIT_SUBJECT).trim_end().to_string()
}

/// A ≤ 50-char imperative commit message generated from the diff.
pub async fn generate_commit_message(
    provider: Option<Arc<dyn StreamProvider>>,
    diff: &str,
) -> String {
    let Some(provider) = provider else {
        return FALLBACK_COMMIT_MESSAGE.into();
    };
    let prompt = format!(
        "Write a git commit message for the diff below.\n\
         Rules: imperative mood, at most 50 characters, no quotes, no period.\n\
         Respond with the message only.\n\n{}",
        clip(diff, MAX_DIFF_PROMPT_BYTES)
    );
    let req = StreamRequest {
        messages: vec![Message::user(prompt)],
        ..Default::default()
    };
    match provider.complete_once(req).await {
        Ok(completion) if !completion.text.trim().is_empty() => clamp_subject(&completion.text),
        Ok(_) => FALLBACK_COMMIT_MESSAGE.into(),
        Err(e) => {
            warn!(error = %e, "commit message generation failed; using fallback");
            FALLBACK_COMMIT_MESSAGE.into()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrText {
    pub title: String,
    pub description: String,
}

/// PR title (≤ 50 chars) and description generated from the diff and the
/// branch's recent commit subjects.
pub async fn generate_pr_text(
    provider: Option<Arc<dyn StreamProvider>>,
    diff: &str,
    recent_commits: &[String],
) -> PrText {
    let fallback = PrText {
        title: FALLBACK_PR_TITLE.into(),
        description: "Automated changes from a Shadow task.".into(),
    };
    let Some(provider) = provider else {
        return fallback;
    };
    let prompt = format!(
        "Summarize this branch as a pull request.\n\
         Respond with a JSON object: {{\"title\": \"...\", \"description\": \"...\"}}.\n\
         The title is imperative and at most 50 characters. The description is markdown.\n\n\
         Recent commits:\n{}\n\nDiff:\n{}",
        recent_commits.join("\n"),
        clip(diff, MAX_DIFF_PROMPT_BYTES)
    );
    let req = StreamRequest {
        messages: vec![Message::user(prompt)],
        ..Default::default()
    };
    match provider.complete_once(req).await {
        Ok(completion) => match parse_pr_text(&completion.text) {
            Some(mut text) => {
                text.title = clamp_subject(&text.title);
                if text.title.is_empty() {
                    text.title = FALLBACK_PR_TITLE.into();
                }
                text
            }
            None => {
                warn!("PR text generation returned no parseable JSON; using fallback");
                fallback
            }
        },
        Err(e) => {
            warn!(error = %e, "PR text generation failed; using fallback");
            fallback
        }
    }
}

/// Extract the first JSON object from a completion that may wrap it in
/// prose or a code fence.
fn parse_pr_text(text: &str) -> Option<PrText> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// A short task title from the user's first message.
pub async fn generate_task_title(
    provider: Option<Arc<dyn StreamProvider>>,
    user_text: &str,
) -> String {
    let fallback = clamp_subject(user_text);
    let Some(provider) = provider else {
        return fallback;
    };
    let prompt = format!(
        "Write a short title (at most 50 characters) for this coding task. \
         Respond with the title only.\n\n{}",
        clip(user_text, 2_000)
    );
    let req = StreamRequest {
        messages: vec![Message::user(prompt)],
        ..Default::default()
    };
    match provider.complete_once(req).await {
        Ok(completion) if !completion.text.trim().is_empty() => clamp_subject(&completion.text),
        _ => fallback,
    }
}

/// Derive the working branch name from a title: `shadow/<slug>-<6 hex>`.
pub fn shadow_branch_for(title: &str) -> String {
    let slug: String = title
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .take(5)
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.is_empty() { "task".to_string() } else { slug };
    let suffix: u32 = rand::thread_rng().gen_range(0..0x1000000);
    format!("shadow/{slug}-{suffix:06x}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use shadow_model::{Completion, MockProvider};

    #[tokio::test]
    async fn commit_message_is_clamped_to_subject_length() {
        let mock = Arc::new(MockProvider::new("mini"));
        mock.script_completion(Completion {
            text: "Add a health endpoint that reports build metadata and uptime statistics"
                .into(),
            tool_calls: vec![],
        });
        let msg = generate_commit_message(Some(mock), "diff").await;
        assert!(msg.len() <= MAX_COMMIT_SUBJECT);
        assert!(msg.starts_with("Add a health endpoint"));
    }

    #[tokio::test]
    async fn commit_message_falls_back_without_provider() {
        assert_eq!(
            generate_commit_message(None, "diff").await,
            FALLBACK_COMMIT_MESSAGE
        );
    }

    #[tokio::test]
    async fn commit_message_falls_back_on_provider_error() {
        // No scripted completion: the mock errors.
        let mock = Arc::new(MockProvider::new("mini"));
        assert_eq!(
            generate_commit_message(Some(mock), "diff").await,
            FALLBACK_COMMIT_MESSAGE
        );
    }

    #[tokio::test]
    async fn pr_text_parses_json_with_fences() {
        let mock = Arc::new(MockProvider::new("mini"));
        mock.script_completion(Completion {
            text: "```json\n{\"title\": \"Add health endpoint\", \"description\": \"Adds /health.\"}\n```"
                .into(),
            tool_calls: vec![],
        });
        let text = generate_pr_text(Some(mock), "diff", &[]).await;
        assert_eq!(text.title, "Add health endpoint");
        assert_eq!(text.description, "Adds /health.");
    }

    #[tokio::test]
    async fn pr_text_falls_back_on_garbage() {
        let mock = Arc::new(MockProvider::new("mini"));
        mock.script_completion(Completion {
            text: "no json here".into(),
            tool_calls: vec![],
        });
        let text = generate_pr_text(Some(mock), "diff", &[]).await;
        assert_eq!(text.title, FALLBACK_PR_TITLE);
    }

    #[tokio::test]
    async fn task_title_falls_back_to_clamped_user_text() {
        let title = generate_task_title(None, "add a health endpoint to the api server").await;
        assert_eq!(title, "add a health endpoint to the api server");
    }

    #[test]
    fn branch_slug_shape_and_randomness() {
        let a = shadow_branch_for("Add health endpoint!");
        assert!(a.starts_with("shadow/add-health-endpoint-"), "{a}");
        let suffix = a.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let b = shadow_branch_for("Add health endpoint!");
        assert_ne!(a, b, "random suffix should differ");
    }

    #[test]
    fn branch_slug_survives_empty_title() {
        let branch = shadow_branch_for("!!!");
        assert!(branch.starts_with("shadow/task-"), "{branch}");
    }

    #[test]
    fn clamp_subject_takes_first_line_only() {
        assert_eq!(clamp_subject("First line\nSecond line"), "First line");
        assert_eq!(clamp_subject("  padded  "), "padded");
    }
}
