// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end liveness tests: registration, dedup, ping/pong, staleness
//! eviction, and supervisor reconnect behavior against a real in-process
//! relay.

use std::time::Duration;

use tokio::sync::broadcast;

use livelink_client::{ConnectionStatus, StateEvent, Supervisor, SupervisorConfig};
use livelink_relay::error::CloseReason;
use livelink_specs::{
    fast_config, free_port, recv_close_reason, recv_frame_of_type, send_text, RelayHandle,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Receive events until one matches the wanted status.
async fn wait_for_status(
    events: &mut broadcast::Receiver<StateEvent>,
    status: ConnectionStatus,
) -> anyhow::Result<StateEvent> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("timed out waiting for {status:?}"))?;
        let event = tokio::time::timeout(remaining, events.recv()).await??;
        if event.status == status {
            return Ok(event);
        }
    }
}

/// Supervisor timing tuned for tests.
fn fast_supervisor(relay: &RelayHandle, identity: &str) -> SupervisorConfig {
    let mut config = SupervisorConfig::new(relay.base_url(), identity);
    config.probe_interval = Duration::from_millis(50);
    config.initial_backoff = Duration::from_millis(20);
    config.max_backoff = Duration::from_millis(200);
    config
}

// -- Raw transport ------------------------------------------------------------

#[tokio::test]
async fn registration_sends_correlation_id() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let mut ws = relay.connect_raw("visitor-1").await?;

    let connected = recv_frame_of_type(&mut ws, "connected", TIMEOUT).await?;
    let id = connected["connectionId"].as_str().unwrap_or_default();
    assert!(!id.is_empty());

    assert_eq!(relay.state.registry.count().await, 1);
    assert_eq!(relay.state.registry.id_for_identity("visitor-1").await.as_deref(), Some(id));
    Ok(())
}

#[tokio::test]
async fn ping_pong_round_trip() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let mut ws = relay.connect_raw("visitor-1").await?;

    let connected = recv_frame_of_type(&mut ws, "connected", TIMEOUT).await?;
    let id = connected["connectionId"].as_str().unwrap_or_default().to_owned();

    // Let some silence accumulate so the pong timestamp update is visible.
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_text(&mut ws, format!(r#"{{"type":"ping","timestamp":1,"connectionId":"{id}"}}"#))
        .await?;
    let pong = recv_frame_of_type(&mut ws, "pong", TIMEOUT).await?;
    assert_eq!(pong["connectionId"], id.as_str());
    assert!(pong["timestamp"].is_u64());

    let entry = relay
        .state
        .registry
        .lookup(&id)
        .await
        .ok_or_else(|| anyhow::anyhow!("entry missing"))?;
    assert!(entry.silence().await < Duration::from_millis(50), "pong must advance liveness");
    Ok(())
}

#[tokio::test]
async fn second_connection_for_identity_supersedes_first() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;

    let mut first = relay.connect_raw("visitor-1").await?;
    let frame = recv_frame_of_type(&mut first, "connected", TIMEOUT).await?;
    let first_id = frame["connectionId"].as_str().unwrap_or_default().to_owned();

    let mut second = relay.connect_raw("visitor-1").await?;
    let frame = recv_frame_of_type(&mut second, "connected", TIMEOUT).await?;
    let second_id = frame["connectionId"].as_str().unwrap_or_default().to_owned();
    assert_ne!(first_id, second_id);

    // The first transport observes the documented eviction reason.
    let reason = recv_close_reason(&mut first, TIMEOUT).await?;
    assert_eq!(reason, "superseded");

    // Exactly one live entry for the identity afterward.
    assert_eq!(relay.state.registry.count().await, 1);
    assert_eq!(
        relay.state.registry.id_for_identity("visitor-1").await,
        Some(second_id)
    );
    Ok(())
}

#[tokio::test]
async fn malformed_frame_gets_error_and_connection_survives() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let mut ws = relay.connect_raw("visitor-1").await?;

    let connected = recv_frame_of_type(&mut ws, "connected", TIMEOUT).await?;
    let id = connected["connectionId"].as_str().unwrap_or_default().to_owned();

    send_text(&mut ws, "this is not json").await?;
    let error = recv_frame_of_type(&mut ws, "error", TIMEOUT).await?;
    assert_eq!(error["error"], "Failed to process message");
    assert_eq!(error["connectionId"], id.as_str());

    // The connection is still open and serviceable.
    send_text(&mut ws, r#"{"type":"ping"}"#).await?;
    recv_frame_of_type(&mut ws, "pong", TIMEOUT).await?;

    let entry = relay
        .state
        .registry
        .lookup(&id)
        .await
        .ok_or_else(|| anyhow::anyhow!("entry missing"))?;
    assert_eq!(entry.message_count.load(std::sync::atomic::Ordering::Relaxed), 0);
    assert_eq!(entry.recent_errors.lock().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn silent_connection_is_declared_stale() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let mut ws = relay.connect_raw("visitor-1").await?;
    recv_frame_of_type(&mut ws, "connected", TIMEOUT).await?;

    // Inside the 500ms staleness window the entry must survive sweeps.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.state.registry.count().await, 1);

    // Never answer the relay's pings: the connection goes silent and is
    // evicted with the staleness reason.
    let reason = recv_close_reason(&mut ws, TIMEOUT).await?;
    assert_eq!(reason, "stale");

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while relay.state.registry.count().await != 0 {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("stale entry never removed from registry");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn echo_frames_are_restamped() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let mut ws = relay.connect_raw("visitor-1").await?;

    let connected = recv_frame_of_type(&mut ws, "connected", TIMEOUT).await?;
    let id = connected["connectionId"].as_str().unwrap_or_default().to_owned();

    send_text(&mut ws, r#"{"type":"chat","text":"hello"}"#).await?;
    let echo = recv_frame_of_type(&mut ws, "chat", TIMEOUT).await?;
    assert_eq!(echo["text"], "hello");
    assert_eq!(echo["connectionId"], id.as_str());

    let entry = relay
        .state
        .registry
        .lookup(&id)
        .await
        .ok_or_else(|| anyhow::anyhow!("entry missing"))?;
    assert_eq!(entry.message_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    Ok(())
}

// -- Supervisor ---------------------------------------------------------------

#[tokio::test]
async fn supervisor_connects_and_reconnects_after_server_drop() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let supervisor = Supervisor::new(fast_supervisor(&relay, "visitor-9"));
    let mut events = supervisor.subscribe_events();

    supervisor.connect();
    wait_for_status(&mut events, ConnectionStatus::Connected).await?;

    // Supervisor answers relay pings, so the entry never goes stale.
    let first_id = {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            if let Some(id) = relay.state.registry.id_for_identity("visitor-9").await {
                break id;
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("supervisor never registered");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    // Simulated network drop: the relay force-closes the transport.
    relay.state.registry.remove(&first_id, CloseReason::Closed).await;

    wait_for_status(&mut events, ConnectionStatus::Error).await?;
    wait_for_status(&mut events, ConnectionStatus::Connecting).await?;
    let reconnected = wait_for_status(&mut events, ConnectionStatus::Connected).await?;
    assert_eq!(reconnected.attempt, 0, "attempt counter resets on success");

    // A fresh correlation id, and still exactly one entry for the identity.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let second_id = loop {
        match relay.state.registry.id_for_identity("visitor-9").await {
            Some(id) if id != first_id => break id,
            _ if tokio::time::Instant::now() > deadline => {
                anyhow::bail!("supervisor never re-registered");
            }
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    };
    assert_ne!(second_id, first_id);
    assert_eq!(relay.state.registry.count().await, 1);

    supervisor.disconnect();
    wait_for_status(&mut events, ConnectionStatus::Disconnected).await?;
    Ok(())
}

#[tokio::test]
async fn supervisor_send_reaches_echo_path() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let supervisor = Supervisor::new(fast_supervisor(&relay, "visitor-2"));
    let mut events = supervisor.subscribe_events();
    let mut messages = supervisor.subscribe_messages();

    assert!(!supervisor.send("too early"), "send must fail silently while disconnected");

    supervisor.connect();
    wait_for_status(&mut events, ConnectionStatus::Connected).await?;

    assert!(supervisor.send(r#"{"type":"chat","text":"over the wire"}"#));

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("echo never arrived"))?;
        let text = tokio::time::timeout(remaining, messages.recv()).await??;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        if value["type"] == "chat" {
            assert_eq!(value["text"], "over the wire");
            assert!(value["connectionId"].is_string());
            break;
        }
    }

    supervisor.disconnect();
    Ok(())
}

#[tokio::test]
async fn supervisor_learns_correlation_id() -> anyhow::Result<()> {
    let relay = RelayHandle::start(fast_config()).await?;
    let supervisor = Supervisor::new(fast_supervisor(&relay, "visitor-3"));
    let mut events = supervisor.subscribe_events();

    supervisor.connect();
    wait_for_status(&mut events, ConnectionStatus::Connected).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let learned = loop {
        if let Some(id) = supervisor.connection_id() {
            break id;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("supervisor never learned its correlation id");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(
        relay.state.registry.id_for_identity("visitor-3").await,
        Some(learned)
    );
    supervisor.disconnect();
    Ok(())
}

#[tokio::test]
async fn retry_exhaustion_is_terminal() -> anyhow::Result<()> {
    // Nobody listens on this port.
    let port = free_port()?;
    let mut config = SupervisorConfig::new(format!("ws://127.0.0.1:{port}"), "visitor-4");
    config.initial_backoff = Duration::from_millis(10);
    config.max_backoff = Duration::from_millis(40);
    config.max_reconnect_attempts = 2;

    let supervisor = Supervisor::new(config);
    let mut events = supervisor.subscribe_events();
    supervisor.connect();

    // Drain transitions until the terminal event.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let terminal = loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("terminal event never arrived"))?;
        let event = tokio::time::timeout(remaining, events.recv()).await??;
        assert_ne!(event.status, ConnectionStatus::Connected);
        if event.terminal {
            break event;
        }
    };

    assert_eq!(terminal.status, ConnectionStatus::Error);
    assert_eq!(terminal.error.as_deref(), Some("reconnect attempts exhausted"));
    assert_eq!(terminal.attempt, 2);

    // No further transitions are scheduled after the terminal event.
    let silence = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(silence.is_err(), "no events may follow the terminal error");
    assert_eq!(supervisor.status(), ConnectionStatus::Error);
    assert!(!supervisor.send("x"));
    Ok(())
}

#[tokio::test]
async fn disconnect_cancels_pending_retry() -> anyhow::Result<()> {
    let port = free_port()?;
    let mut config = SupervisorConfig::new(format!("ws://127.0.0.1:{port}"), "visitor-5");
    // A retry is scheduled far in the future; disconnect must not wait for it.
    config.initial_backoff = Duration::from_secs(3600);

    let supervisor = Supervisor::new(config);
    let mut events = supervisor.subscribe_events();
    supervisor.connect();

    wait_for_status(&mut events, ConnectionStatus::Error).await?;
    supervisor.disconnect();

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        wait_for_status(&mut events, ConnectionStatus::Disconnected).await
    })
    .await??;
    assert_eq!(event.status, ConnectionStatus::Disconnected);
    assert_eq!(supervisor.status(), ConnectionStatus::Disconnected);
    Ok(())
}
