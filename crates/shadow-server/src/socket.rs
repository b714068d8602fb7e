// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::debug;

use crate::AppState;

/// Task-scoped event stream: every chunk-protocol event for the task is
/// pushed to the socket as a JSON text frame.
pub async fn task_events(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state, task_id))
}

async fn stream_events(mut socket: WebSocket, state: AppState, task_id: String) {
    let mut rx = state.events.subscribe(&task_id);
    debug!(task = %task_id, "event socket attached");
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Ok(event) = event else {
                    // Lagged or closed: a UI that fell behind reconnects and
                    // re-reads the persisted transcript.
                    break;
                };
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Clients only ever send close/ping frames.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    debug!(task = %task_id, "event socket detached");
}
