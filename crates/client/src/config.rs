// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for a [`crate::Supervisor`].
///
/// The target URL is fixed at construction time; it is not re-resolved
/// between attempts.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Relay base URL (`ws://`, `wss://`, `http://`, or `https://`).
    pub url: String,
    /// Logical client identity, independent of any transport instance.
    pub identity: String,
    /// Interval between client-side liveness probes.
    pub probe_interval: Duration,
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Ceiling on the reconnect delay.
    pub max_backoff: Duration,
    /// Consecutive failed attempts before the supervisor gives up.
    pub max_reconnect_attempts: u32,
}

impl SupervisorConfig {
    pub fn new(url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self { url: url.into(), identity: identity.into(), ..Self::default() }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9460".to_owned(),
            identity: String::new(),
            probe_interval: Duration::from_secs(20),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}
