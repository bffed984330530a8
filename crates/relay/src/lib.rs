// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Livelink relay: connection lifecycle manager for a bidirectional
//! client/relay channel. Holds the authoritative connection registry,
//! probes every transport for liveness, and sweeps out the silent ones.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::probe::spawn_sweeper;
use crate::state::RelayState;
use crate::transport::build_router;

/// Run the relay until shutdown.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(RelayState::new(config, shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    spawn_sweeper(Arc::clone(&state));

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("livelink relay listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
