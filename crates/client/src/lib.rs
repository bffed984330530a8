// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Livelink client: connection supervisor for one logical channel to a
//! relay. Keeps the channel available across network interruptions with
//! capped geometric reconnect backoff and client-side liveness probing.

pub mod backoff;
pub mod config;
pub mod supervisor;

pub use backoff::reconnect_delay;
pub use config::SupervisorConfig;
pub use supervisor::{ConnectionStatus, StateEvent, Supervisor};
