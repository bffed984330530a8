// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames exchanged over a livelink connection.
//!
//! Every frame is a JSON object with a `type` discriminant; liveness frames
//! (`ping`/`pong`) additionally carry a timestamp and the connection's
//! correlation id. Application fields are preserved verbatim through the
//! flattened `extra` map so the relay never has to understand payloads.

use serde::{Deserialize, Serialize};

/// Error message sent back for frames that fail to parse.
pub const MALFORMED_FRAME_MESSAGE: &str = "Failed to process message";

/// A single JSON frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,

    /// Epoch milliseconds, stamped by the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    /// Correlation id of the connection the frame belongs to.
    #[serde(rename = "connectionId", skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Application-defined fields, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to the wire representation. `None` only if a payload value
    /// cannot be serialized, which serde_json guarantees not to happen for
    /// the types used here.
    pub fn to_text(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Liveness probe.
    pub fn ping(connection_id: &str) -> Self {
        Self::bare("ping", connection_id)
    }

    /// Liveness acknowledgment. Echoes the correlation id of the ping it
    /// answers.
    pub fn pong(connection_id: &str) -> Self {
        Self::bare("pong", connection_id)
    }

    /// Registration acknowledgment telling the client its correlation id.
    pub fn connected(connection_id: &str) -> Self {
        Self::bare("connected", connection_id)
    }

    /// Structured error frame for a malformed inbound frame.
    pub fn error(connection_id: &str) -> Self {
        let mut frame = Self::bare("error", connection_id);
        frame.extra.insert(
            "error".to_owned(),
            serde_json::Value::String(MALFORMED_FRAME_MESSAGE.to_owned()),
        );
        frame
    }

    fn bare(kind: &str, connection_id: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            timestamp: Some(epoch_ms()),
            connection_id: Some(connection_id.to_owned()),
            extra: serde_json::Map::new(),
        }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
