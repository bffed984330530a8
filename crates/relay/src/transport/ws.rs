// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handler: one socket task per connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::dispatch;
use crate::error::CloseReason;
use crate::probe;
use crate::protocol::Frame;
use crate::state::RelayState;

/// Query parameters for the WS upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    /// Logical client identity, required for dedup.
    pub identity: Option<String>,
}

/// `GET /ws?identity=<clientIdentity>` — WebSocket upgrade.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(identity) = query.identity.filter(|id| !id.is_empty()) else {
        return axum::http::Response::builder()
            .status(400)
            .body(axum::body::Body::from("missing identity query parameter"))
            .unwrap_or_default()
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(state, identity, socket)).into_response()
}

/// Per-connection socket loop.
///
/// Owns the transport: the outbound mpsc channel is the only write path, and
/// exiting this function (after the registry removal below) is the only way
/// the entry disappears. Registration evicts any prior connection for the
/// same identity before this one goes live.
async fn handle_socket(state: Arc<RelayState>, identity: String, socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let entry = state.registry.register(&identity, tx).await;

    // Tell the client its correlation id up front.
    entry.send_frame(&Frame::connected(&entry.connection_id));
    probe::spawn_probe(Arc::clone(&state.registry), Arc::clone(&entry));

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Evicted or removed: flush any queued close frame to the peer.
            _ = entry.cancel.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                break;
            }

            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if ws_tx.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch::handle_frame(&entry, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(
                            connection_id = %entry.connection_id,
                            identity = %identity,
                            "client closed connection"
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            connection_id = %entry.connection_id,
                            identity = %identity,
                            err = %e,
                            "transport error"
                        );
                        break;
                    }
                    _ => {} // binary and WS-level ping/pong ignored
                }
            }
        }
    }

    // No-op if the entry was already evicted or swept.
    state.registry.remove(&entry.connection_id, CloseReason::Closed).await;
}
