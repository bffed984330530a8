// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-frame routing: the single decision point for every inbound frame.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::protocol::{epoch_ms, Frame};
use crate::registry::ConnectionEntry;

/// Route one inbound text frame for a connection.
///
/// Malformed frames are answered with an error frame and recorded against
/// the connection; they never terminate it. Liveness frames update the pong
/// timestamp — receipt of any ping also counts as proof the transport is
/// alive. Everything else goes to the relay path, which echoes the frame
/// back stamped with the server timestamp and correlation id.
pub async fn handle_frame(entry: &Arc<ConnectionEntry>, text: &str) {
    let frame = match Frame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(
                connection_id = %entry.connection_id,
                err = %e,
                "malformed frame"
            );
            entry.record_error(e.to_string()).await;
            entry.send_frame(&Frame::error(&entry.connection_id));
            return;
        }
    };

    match frame.kind.as_str() {
        "pong" => {
            entry.mark_pong_received().await;
        }
        "ping" => {
            entry.mark_pong_received().await;
            let id = frame.connection_id.as_deref().unwrap_or(&entry.connection_id);
            entry.send_frame(&Frame::pong(id));
        }
        _ => {
            entry.message_count.fetch_add(1, Ordering::Relaxed);
            relay_frame(entry, frame);
        }
    }
}

/// Built-in relay path: echo the frame back, restamped.
///
/// The surrounding product replaces this with its own handler; payload
/// semantics stay opaque here.
fn relay_frame(entry: &Arc<ConnectionEntry>, mut frame: Frame) {
    frame.timestamp = Some(epoch_ms());
    frame.connection_id = Some(entry.connection_id.clone());
    entry.send_frame(&frame);
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
