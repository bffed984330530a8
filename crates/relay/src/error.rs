// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason a connection was closed by the registry.
///
/// Carried as the WebSocket close-frame reason so client logs can tell an
/// eviction by a newer connection apart from a staleness eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Evicted because a newer connection registered for the same identity.
    Superseded,
    /// Declared dead after no inbound frame within the staleness window.
    Stale,
    /// Ordinary teardown (client close, transport error, relay shutdown).
    Closed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::Stale => "stale",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic error recorded against one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    /// Epoch milliseconds at which the error was recorded.
    pub at: u64,
    pub message: String,
}
