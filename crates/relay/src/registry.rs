// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative registry of live connections.
//!
//! Holds one [`ConnectionEntry`] per live transport, keyed by correlation id
//! and indexed by client identity. Enforces the one-connection-per-identity
//! invariant: registering a second connection for an identity closes the
//! first with a `superseded` reason. The registry is an explicitly
//! constructed instance owned by the relay entry point — never a process
//! global — so tests can run several registries side by side.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{CloseReason, RecentError};
use crate::protocol::{epoch_ms, Frame};

/// Cap on diagnostics kept per connection.
const RECENT_ERROR_CAP: usize = 32;

/// State for one live transport.
pub struct ConnectionEntry {
    /// Correlation id, unique per live entry.
    pub connection_id: String,
    /// Logical client identity supplied at connect time.
    pub identity: String,
    /// Write path to the transport. The socket task owns the sink half and
    /// drains this channel; closing the transport goes through [`Self::close`].
    pub sender: mpsc::UnboundedSender<Message>,
    pub last_ping_sent_at: RwLock<Instant>,
    pub last_pong_received_at: RwLock<Instant>,
    /// Application frames handled, diagnostic only.
    pub message_count: AtomicU64,
    /// Bounded ring of recent per-frame errors, diagnostic only.
    pub recent_errors: Mutex<VecDeque<RecentError>>,
    pub registered_at: Instant,
    /// Cancels the probe timer and the socket loop for this entry.
    pub cancel: CancellationToken,
}

impl ConnectionEntry {
    fn new(identity: &str, sender: mpsc::UnboundedSender<Message>) -> Self {
        let now = Instant::now();
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            identity: identity.to_owned(),
            sender,
            last_ping_sent_at: RwLock::new(now),
            last_pong_received_at: RwLock::new(now),
            message_count: AtomicU64::new(0),
            recent_errors: Mutex::new(VecDeque::new()),
            registered_at: now,
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a frame for the transport. Returns false if the socket task is
    /// gone or the frame cannot be serialized.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        match frame.to_text() {
            Some(text) => self.sender.send(Message::Text(text.into())).is_ok(),
            None => false,
        }
    }

    pub async fn mark_ping_sent(&self) {
        *self.last_ping_sent_at.write().await = Instant::now();
    }

    pub async fn mark_pong_received(&self) {
        *self.last_pong_received_at.write().await = Instant::now();
    }

    /// Time since any liveness-proving frame arrived on this connection.
    pub async fn silence(&self) -> Duration {
        self.last_pong_received_at.read().await.elapsed()
    }

    /// Record a per-frame error, dropping the oldest past the cap.
    pub async fn record_error(&self, message: impl Into<String>) {
        let mut errors = self.recent_errors.lock().await;
        if errors.len() >= RECENT_ERROR_CAP {
            errors.pop_front();
        }
        errors.push_back(RecentError { at: epoch_ms(), message: message.into() });
    }

    /// Close the transport with a reason and stop this entry's timers.
    ///
    /// The close frame is queued before the token is cancelled so the socket
    /// task can still flush it to the peer.
    fn close(&self, reason: CloseReason) {
        let _ = self.sender.send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: reason.as_str().into(),
        })));
        self.cancel.cancel();
    }
}

/// Diagnostic snapshot of one connection, served by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub identity: String,
    pub message_count: u64,
    pub uptime_secs: u64,
    pub silence_ms: u64,
    pub recent_errors: Vec<RecentError>,
}

struct Tables {
    by_id: HashMap<String, Arc<ConnectionEntry>>,
    by_identity: HashMap<String, String>,
}

/// Registry of all live connections plus the shared timing policy.
pub struct ConnectionRegistry {
    tables: RwLock<Tables>,
    last_sweep: Mutex<Option<Instant>>,
    probe_interval: Duration,
    pong_timeout: Duration,
    sweep_min_interval: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        probe_interval: Duration,
        pong_timeout: Duration,
        sweep_min_interval: Duration,
    ) -> Self {
        Self {
            tables: RwLock::new(Tables { by_id: HashMap::new(), by_identity: HashMap::new() }),
            last_sweep: Mutex::new(None),
            probe_interval,
            pong_timeout,
            sweep_min_interval,
        }
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    /// A connection with no inbound frame for this long is stale.
    pub fn staleness_threshold(&self) -> Duration {
        self.probe_interval + self.pong_timeout
    }

    /// Register a new connection for `identity`, evicting any prior one.
    ///
    /// Eviction is the dedup contract, not an error: the superseded entry's
    /// transport is closed with the `superseded` reason and its timers are
    /// cancelled. Both tables are updated under one write lock so the
    /// one-connection-per-identity invariant holds at every instant.
    pub async fn register(
        &self,
        identity: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Arc<ConnectionEntry> {
        let entry = Arc::new(ConnectionEntry::new(identity, sender));

        let evicted = {
            let mut tables = self.tables.write().await;
            let evicted = tables
                .by_identity
                .remove(identity)
                .and_then(|old_id| tables.by_id.remove(&old_id));
            tables.by_id.insert(entry.connection_id.clone(), Arc::clone(&entry));
            tables.by_identity.insert(identity.to_owned(), entry.connection_id.clone());
            evicted
        };

        if let Some(old) = evicted {
            tracing::info!(
                identity = %identity,
                old_id = %old.connection_id,
                new_id = %entry.connection_id,
                "evicting superseded connection"
            );
            old.close(CloseReason::Superseded);
        }

        tracing::info!(identity = %identity, connection_id = %entry.connection_id, "registered");
        entry
    }

    pub async fn lookup(&self, connection_id: &str) -> Option<Arc<ConnectionEntry>> {
        self.tables.read().await.by_id.get(connection_id).map(Arc::clone)
    }

    /// Remove a connection and close its transport. Idempotent — removing an
    /// already-removed id is a no-op.
    pub async fn remove(&self, connection_id: &str, reason: CloseReason) {
        let entry = {
            let mut tables = self.tables.write().await;
            let Some(entry) = tables.by_id.remove(connection_id) else {
                return;
            };
            if tables.by_identity.get(&entry.identity).map(String::as_str) == Some(connection_id) {
                tables.by_identity.remove(&entry.identity);
            }
            entry
        };

        // `close` queues the close frame before cancelling, so the socket
        // task can flush it; a probe tick racing this removal sees either the
        // cancelled token or a dead channel and no-ops.

        tracing::info!(
            connection_id = %connection_id,
            identity = %entry.identity,
            reason = %reason,
            "removed connection"
        );
        entry.close(reason);
    }

    /// Walk all entries and evict any past the staleness threshold.
    ///
    /// The safety net for transports whose close event never fires. Throttled
    /// to at most one walk per `sweep_min_interval` no matter how often it is
    /// called; returns the evicted correlation ids.
    pub async fn sweep(&self) -> Vec<String> {
        {
            let mut last = self.last_sweep.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < self.sweep_min_interval {
                    return Vec::new();
                }
            }
            *last = Some(Instant::now());
        }

        let threshold = self.staleness_threshold();
        let entries: Vec<_> = {
            let tables = self.tables.read().await;
            tables.by_id.values().map(Arc::clone).collect()
        };

        let mut removed = Vec::new();
        for entry in entries {
            if entry.silence().await > threshold {
                tracing::warn!(
                    connection_id = %entry.connection_id,
                    identity = %entry.identity,
                    "sweep: connection went silent, evicting"
                );
                self.remove(&entry.connection_id, CloseReason::Stale).await;
                removed.push(entry.connection_id.clone());
            }
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.tables.read().await.by_id.len()
    }

    /// Current correlation id for an identity, if one is live.
    pub async fn id_for_identity(&self, identity: &str) -> Option<String> {
        self.tables.read().await.by_identity.get(identity).cloned()
    }

    /// Diagnostic snapshot of every live connection.
    pub async fn snapshot(&self) -> Vec<ConnectionInfo> {
        let entries: Vec<_> = {
            let tables = self.tables.read().await;
            tables.by_id.values().map(Arc::clone).collect()
        };

        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(ConnectionInfo {
                connection_id: entry.connection_id.clone(),
                identity: entry.identity.clone(),
                message_count: entry.message_count.load(Ordering::Relaxed),
                uptime_secs: entry.registered_at.elapsed().as_secs(),
                silence_ms: entry.silence().await.as_millis() as u64,
                recent_errors: entry.recent_errors.lock().await.iter().cloned().collect(),
            });
        }
        infos
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
