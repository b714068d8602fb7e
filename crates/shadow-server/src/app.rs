// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use shadow_core::{EventBus, TaskKernel};
use shadow_db::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub events: Arc<EventBus>,
    /// Present in the full server; `None` in surface-only tests.
    pub kernel: Option<Arc<TaskKernel>>,
    pub webhook_secret: Option<String>,
}

/// Build the HTTP app.  CORS admits the configured frontend origin only.
pub fn build_router(state: AppState, client_url: &str) -> Router {
    let cors = match client_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(client_url, "unparseable client URL; CORS closed");
            CorsLayer::new()
        }
    };
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/github", post(crate::webhook::github_webhook))
        .route("/api/tasks/:task_id/events", get(crate::socket::task_events))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "shadow" }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn state() -> AppState {
        AppState {
            store: Arc::new(Store::in_memory().unwrap()),
            events: Arc::new(EventBus::new()),
            kernel: None,
            webhook_secret: Some("secret".into()),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_router(state(), "http://localhost:3000");
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
