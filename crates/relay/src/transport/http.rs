// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diagnostic HTTP endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::registry::ConnectionInfo;
use crate::state::RelayState;

/// `GET /api/v1/health` — liveness of the relay process itself.
pub async fn health(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "connections": state.registry.count().await,
    }))
}

/// `GET /api/v1/connections` — snapshot of all live connections.
pub async fn connections(State(state): State<Arc<RelayState>>) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry.snapshot().await)
}
