// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background liveness tasks: one probe timer per connection plus a single
//! recurring staleness sweeper.

use std::sync::Arc;

use crate::error::CloseReason;
use crate::protocol::Frame;
use crate::registry::{ConnectionEntry, ConnectionRegistry};
use crate::state::RelayState;

/// Spawn the per-connection probe timer.
///
/// Each tick first checks whether the staleness threshold has already been
/// crossed — if so the connection is closed instead of receiving a doomed
/// probe. A send failure on the probe is treated the same as staleness and
/// removes the connection immediately rather than waiting for the sweeper.
/// The task ends when the entry's cancel token fires.
pub fn spawn_probe(registry: Arc<ConnectionRegistry>, entry: Arc<ConnectionEntry>) {
    let interval = registry.probe_interval();
    let threshold = registry.staleness_threshold();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so probes start one
        // interval after registration.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = entry.cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if entry.silence().await > threshold {
                tracing::warn!(
                    connection_id = %entry.connection_id,
                    identity = %entry.identity,
                    "probe: connection already stale, closing"
                );
                registry.remove(&entry.connection_id, CloseReason::Stale).await;
                break;
            }

            if entry.send_frame(&Frame::ping(&entry.connection_id)) {
                entry.mark_ping_sent().await;
            } else {
                tracing::warn!(
                    connection_id = %entry.connection_id,
                    identity = %entry.identity,
                    "probe send failed, removing connection"
                );
                registry.remove(&entry.connection_id, CloseReason::Stale).await;
                break;
            }
        }
    });
}

/// Spawn the single recurring sweeper task.
///
/// One timer for the whole registry; `sweep` itself stays throttled so
/// ad-hoc callers cannot trigger redundant walks between ticks.
pub fn spawn_sweeper(state: Arc<RelayState>) {
    let interval = state.config.sweep_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let removed = state.registry.sweep().await;
            if !removed.is_empty() {
                tracing::warn!(count = removed.len(), "sweep evicted stale connections");
            }
        }
    });
}
