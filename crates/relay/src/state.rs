// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::registry::ConnectionRegistry;

/// Shared relay state.
pub struct RelayState {
    pub config: RelayConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.probe_interval(),
            config.pong_timeout(),
            config.sweep_interval(),
        ));
        Self { config, registry, shutdown }
    }
}
