// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use shadow_github::{verify_signature, PullRequestClosed};

use crate::AppState;

/// GitHub webhook sink.
///
/// Signature mismatch → 401, malformed payload → 400, neither with side
/// effects.  The only action acted on is `pull_request.closed`: every
/// non-archived task bound to that PR is archived and the count reported.
/// Everything else is acknowledged and ignored.
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = &state.webhook_secret else {
        warn!("webhook received but no secret is configured");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(secret, &body, signature) {
        warn!("webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "signature mismatch").into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, "malformed payload").into_response(),
    };

    let Some(closed) = PullRequestClosed::from_payload(&payload) else {
        // Not a PR-closed event: acknowledged and ignored.
        return Json(json!({ "ok": true, "ignored": true })).into_response();
    };

    match state
        .store
        .archive_tasks_for_pr(&closed.repo_full_name, closed.number)
    {
        Ok(archived) => {
            info!(
                repo = %closed.repo_full_name,
                pr = closed.number,
                merged = closed.merged,
                archived = archived.len(),
                "pull request closed; tasks archived"
            );
            // ARCHIVED is terminal: drop each task's in-memory state too.
            if let Some(kernel) = &state.kernel {
                for task_id in &archived {
                    kernel.cleanup_task(task_id).await;
                }
            }
            Json(json!({ "ok": true, "archived": archived.len() })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "archiving tasks for closed PR failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hmac::{Hmac, Mac};
    use http_body_util::BodyExt;
    use sha2::Sha256;
    use tower::ServiceExt;

    use shadow_core::EventBus;
    use shadow_db::{NewTask, Store, TaskStatus};

    use crate::{build_router, AppState};

    const SECRET: &str = "topsecret";

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn seeded_state() -> (AppState, Vec<String>) {
        let store = Arc::new(Store::in_memory().unwrap());
        let mut ids = Vec::new();
        for i in 0..2 {
            let task = store
                .create_task(NewTask {
                    repo_full_name: "o/r".into(),
                    repo_url: "u".into(),
                    base_branch: "main".into(),
                    shadow_branch: format!("shadow/t{i}-00000{i}"),
                    user_id: "u1".into(),
                    main_model: "claude-sonnet-4-5".into(),
                    title: "t".into(),
                })
                .unwrap();
            store.set_pull_request_number(&task.id, 42).unwrap();
            ids.push(task.id);
        }
        (
            AppState {
                store,
                events: Arc::new(EventBus::new()),
                kernel: None,
                webhook_secret: Some(SECRET.into()),
            },
            ids,
        )
    }

    fn closed_payload() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "action": "closed",
            "pull_request": { "number": 42, "merged": true },
            "repository": { "full_name": "o/r" },
        }))
        .unwrap()
    }

    async fn post(app: axum::Router, body: Vec<u8>, signature: Option<String>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/github")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("x-hub-signature-256", sig);
        }
        let resp = app
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::json!(null));
        (status, value)
    }

    #[tokio::test]
    async fn valid_signature_archives_matching_tasks() {
        let (state, ids) = seeded_state();
        let store = state.store.clone();
        let body = closed_payload();
        let sig = sign(&body);
        let (status, value) = post(build_router(state, "http://localhost:3000"), body, Some(sig)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["archived"], 2);
        for id in ids {
            assert_eq!(
                store.get_task(&id).unwrap().unwrap().status,
                TaskStatus::Archived
            );
        }
    }

    #[tokio::test]
    async fn second_delivery_archives_nothing_more() {
        let (state, _) = seeded_state();
        let body = closed_payload();
        let sig = sign(&body);
        let app = build_router(state, "http://localhost:3000");
        let (_, first) = post(app.clone(), body.clone(), Some(sig.clone())).await;
        assert_eq!(first["archived"], 2);
        let (_, second) = post(app, body, Some(sig)).await;
        assert_eq!(second["archived"], 0);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_side_effects() {
        let (state, ids) = seeded_state();
        let store = state.store.clone();
        let body = closed_payload();
        let (status, _) = post(
            build_router(state, "http://localhost:3000"),
            body,
            Some("sha256=0000000000000000".into()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        for id in ids {
            assert_ne!(
                store.get_task(&id).unwrap().unwrap().status,
                TaskStatus::Archived
            );
        }
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let (state, _) = seeded_state();
        let (status, _) = post(build_router(state, "http://localhost:3000"), closed_payload(), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_payload_is_bad_request() {
        let (state, _) = seeded_state();
        let body = b"not json".to_vec();
        let sig = sign(&body);
        let (status, _) = post(build_router(state, "http://localhost:3000"), body, Some(sig)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_actions_are_acknowledged_and_ignored() {
        let (state, ids) = seeded_state();
        let store = state.store.clone();
        let body = serde_json::to_vec(&serde_json::json!({
            "action": "opened",
            "pull_request": { "number": 42 },
            "repository": { "full_name": "o/r" },
        }))
        .unwrap();
        let sig = sign(&body);
        let (status, value) = post(build_router(state, "http://localhost:3000"), body, Some(sig)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["ignored"], true);
        for id in ids {
            assert_ne!(
                store.get_task(&id).unwrap().unwrap().status,
                TaskStatus::Archived
            );
        }
    }
}
