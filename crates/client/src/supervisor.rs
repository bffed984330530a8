// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection supervisor: owns one transport at a time and maintains the
//! illusion of a continuously-available channel for the caller.
//!
//! State transitions, probe ticks, and transport events all run on the one
//! supervisor task, so subscribers observe transitions in order and exactly
//! once each.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::backoff::reconnect_delay;
use crate::config::SupervisorConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection state visible to the owning application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// One state transition, delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub status: ConnectionStatus,
    pub error: Option<String>,
    /// Reconnect attempts consumed so far; resets to zero on success.
    pub attempt: u32,
    /// Set on the final event when retries are exhausted. No further
    /// transitions follow a terminal event.
    pub terminal: bool,
}

/// How a connected session ended.
enum SessionEnd {
    /// Deliberate teardown via [`Supervisor::disconnect`].
    Teardown,
    /// Unexpected close or transport error; the supervisor will retry.
    Dropped(String),
}

/// Supervisor for one logical channel. Cheap to clone; all clones share the
/// same underlying connection.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    events_tx: broadcast::Sender<StateEvent>,
    messages_tx: broadcast::Sender<String>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    view_tx: watch::Sender<StateEvent>,
    connection_id: Mutex<Option<String>>,
    transport_open: AtomicBool,
    attempts: AtomicU32,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let (messages_tx, _) = broadcast::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(StateEvent {
            status: ConnectionStatus::Disconnected,
            error: None,
            attempt: 0,
            terminal: false,
        });

        Self {
            inner: Arc::new(Inner {
                config,
                events_tx,
                messages_tx,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                view_tx,
                connection_id: Mutex::new(None),
                transport_open: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Start the state machine. Idempotent: subsequent calls are no-ops.
    pub fn connect(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(outbound_rx) = self.inner.outbound_rx.lock().ok().and_then(|mut g| g.take())
        else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_loop(inner, outbound_rx));
    }

    /// Queue a text message for the relay. Returns false — without error —
    /// when no transport is currently open; the caller decides whether to
    /// queue or drop.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if !self.inner.transport_open.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.outbound_tx.send(text.into()).is_ok()
    }

    /// Permanent teardown: cancels any pending retry, stops the probe timer,
    /// and closes the transport. The run loop emits the final
    /// `Disconnected` transition; no auto-retry follows.
    pub fn disconnect(&self) {
        self.inner.cancel.cancel();
    }

    /// Subscribe to state transitions. Events are delivered in transition
    /// order, exactly once per subscriber.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Subscribe to inbound application frames (liveness frames are absorbed
    /// by the supervisor).
    pub fn subscribe_messages(&self) -> broadcast::Receiver<String> {
        self.inner.messages_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.view_tx.borrow().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.view_tx.borrow().error.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Correlation id assigned by the relay for the current transport, once
    /// observed in an inbound frame.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.lock().ok().and_then(|g| g.clone())
    }
}

impl Inner {
    fn transition(&self, status: ConnectionStatus, error: Option<String>, terminal: bool) {
        let event = StateEvent {
            status,
            error,
            attempt: self.attempts.load(Ordering::SeqCst),
            terminal,
        };
        self.view_tx.send_replace(event.clone());
        let _ = self.events_tx.send(event);
    }

    fn set_connection_id(&self, id: String) {
        if let Ok(mut guard) = self.connection_id.lock() {
            *guard = Some(id);
        }
    }
}

/// Connect/retry loop. Runs until deliberate teardown or retry exhaustion.
async fn run_loop(inner: Arc<Inner>, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
    let url = build_ws_url(&inner.config.url, &inner.config.identity);
    let mut attempt: u32 = 0;

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        inner.transition(ConnectionStatus::Connecting, None, false);

        match connect_async(&url).await {
            Ok((ws, _)) => {
                attempt = 0;
                inner.attempts.store(0, Ordering::SeqCst);
                tracing::debug!(identity = %inner.config.identity, "connected");
                inner.transition(ConnectionStatus::Connected, None, false);
                inner.transport_open.store(true, Ordering::SeqCst);

                let end = drive_session(&inner, ws, &mut outbound_rx).await;
                inner.transport_open.store(false, Ordering::SeqCst);

                match end {
                    SessionEnd::Teardown => break,
                    SessionEnd::Dropped(reason) => {
                        tracing::debug!(
                            identity = %inner.config.identity,
                            reason = %reason,
                            "connection dropped"
                        );
                        inner.transition(ConnectionStatus::Error, Some(reason), false);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(identity = %inner.config.identity, err = %e, "connect failed");
                inner.transition(ConnectionStatus::Error, Some(e.to_string()), false);
            }
        }

        if inner.cancel.is_cancelled() {
            break;
        }

        if attempt >= inner.config.max_reconnect_attempts {
            tracing::warn!(
                identity = %inner.config.identity,
                attempts = attempt,
                "reconnect attempts exhausted, giving up"
            );
            inner.transition(
                ConnectionStatus::Error,
                Some("reconnect attempts exhausted".to_owned()),
                true,
            );
            return;
        }

        let delay = reconnect_delay(inner.config.initial_backoff, inner.config.max_backoff, attempt);
        attempt += 1;
        inner.attempts.store(attempt, Ordering::SeqCst);

        // The retry timer is cancellable so a deliberate disconnect can
        // never race a scheduled reconnect.
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.transition(ConnectionStatus::Disconnected, None, false);
}

/// Event loop for one connected session.
async fn drive_session(
    inner: &Inner,
    ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut probe = tokio::time::interval(inner.config.probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately; the first probe goes out one
    // interval after connecting.
    probe.tick().await;

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return SessionEnd::Teardown;
            }

            _ = probe.tick() => {
                let ping = liveness_ping(inner.connection_id.lock().ok().and_then(|g| g.clone()).as_deref());
                // The relay makes the authoritative staleness call; a local
                // probe send failure just means the transport is already
                // gone, so force a reconnect.
                if ws_tx.send(Message::Text(ping.into())).await.is_err() {
                    return SessionEnd::Dropped("probe send failed".to_owned());
                }
            }

            out = outbound_rx.recv() => {
                match out {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            return SessionEnd::Dropped("send failed".to_owned());
                        }
                    }
                    None => return SessionEnd::Teardown,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = handle_inbound(inner, &mut ws_tx, text.as_str()).await {
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by relay".to_owned());
                        return SessionEnd::Dropped(reason);
                    }
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("transport closed".to_owned()),
                    _ => {} // binary and WS-level ping/pong ignored
                }
            }
        }
    }
}

/// Route one inbound frame; returns `Some` when the session must end.
async fn handle_inbound(inner: &Inner, ws_tx: &mut WsSink, text: &str) -> Option<SessionEnd> {
    match classify_inbound(text) {
        Inbound::Pong { connection_id } | Inbound::Connected { connection_id } => {
            if let Some(id) = connection_id {
                inner.set_connection_id(id);
            }
            None
        }
        Inbound::Ping { connection_id } => {
            if let Some(ref id) = connection_id {
                inner.set_connection_id(id.clone());
            }
            let pong = pong_reply(connection_id.as_deref());
            if ws_tx.send(Message::Text(pong.into())).await.is_err() {
                return Some(SessionEnd::Dropped("pong send failed".to_owned()));
            }
            None
        }
        Inbound::Deliver => {
            let _ = inner.messages_tx.send(text.to_owned());
            None
        }
    }
}

/// Classification of an inbound frame.
enum Inbound {
    Ping { connection_id: Option<String> },
    Pong { connection_id: Option<String> },
    Connected { connection_id: Option<String> },
    Deliver,
}

fn classify_inbound(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Inbound::Deliver;
    };
    let connection_id =
        value.get("connectionId").and_then(|v| v.as_str()).map(String::from);
    match value.get("type").and_then(|v| v.as_str()).unwrap_or("") {
        "ping" => Inbound::Ping { connection_id },
        "pong" => Inbound::Pong { connection_id },
        "connected" => Inbound::Connected { connection_id },
        _ => Inbound::Deliver,
    }
}

/// Liveness probe frame carrying the monotonic wall-clock stamp and, once
/// known, the transport's correlation id.
fn liveness_ping(connection_id: Option<&str>) -> String {
    match connection_id {
        Some(id) => serde_json::json!({
            "type": "ping",
            "timestamp": epoch_ms(),
            "connectionId": id,
        })
        .to_string(),
        None => serde_json::json!({ "type": "ping", "timestamp": epoch_ms() }).to_string(),
    }
}

/// Answer a relay-initiated ping, echoing its correlation id.
fn pong_reply(connection_id: Option<&str>) -> String {
    match connection_id {
        Some(id) => serde_json::json!({
            "type": "pong",
            "timestamp": epoch_ms(),
            "connectionId": id,
        })
        .to_string(),
        None => serde_json::json!({ "type": "pong", "timestamp": epoch_ms() }).to_string(),
    }
}

/// Build the relay WebSocket URL from an HTTP or WS base URL.
fn build_ws_url(base_url: &str, identity: &str) -> String {
    let ws_base = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else if base_url.starts_with("http://") {
        base_url.replacen("http://", "ws://", 1)
    } else {
        base_url.to_owned()
    };
    format!("{ws_base}/ws?identity={identity}")
}

/// Return current epoch millis.
fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
