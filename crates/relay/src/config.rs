// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the livelink relay.
#[derive(Debug, Clone, clap::Parser)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "LIVELINK_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9460, env = "LIVELINK_PORT")]
    pub port: u16,

    /// Liveness probe interval in milliseconds.
    #[arg(long, default_value_t = 20000, env = "LIVELINK_PROBE_INTERVAL_MS")]
    pub probe_interval_ms: u64,

    /// Grace period after a probe before a silent connection counts as stale,
    /// in milliseconds.
    #[arg(long, default_value_t = 10000, env = "LIVELINK_PONG_TIMEOUT_MS")]
    pub pong_timeout_ms: u64,

    /// Minimum interval between staleness sweeps in milliseconds.
    #[arg(long, default_value_t = 30000, env = "LIVELINK_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,
}

impl RelayConfig {
    pub fn probe_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.probe_interval_ms)
    }

    pub fn pong_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }
}
