// tests/integration/endpoint_test.rs

//! The peer-side endpoints and the host-process agent against a live relay.

use super::test_helpers::{IO_TIMEOUT, TestRelay, wait_until};
use relayd::config::HandlerKind;
use relayd::core::metrics::gather_metrics;
use relayd::endpoint::{Announcement, ClientEndpoint, CommandListener, EchoHandler, HostProcessEndpoint, agent};
use std::time::Duration;
use tokio::sync::oneshot;

/// Reads from `client` until `len` bytes have arrived.
async fn recv_exactly(client: &mut ClientEndpoint, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        let chunk = tokio::time::timeout(IO_TIMEOUT, client.recv())
            .await
            .expect("timed out waiting for echo")
            .expect("recv failed")
            .expect("relay closed the client");
        received.extend_from_slice(&chunk);
    }
    received
}

#[tokio::test]
async fn test_client_endpoint_round_trip_through_echo_host() {
    let relay = TestRelay::start().await;
    let mut listener = CommandListener::connect(relay.command_addr).await.unwrap();
    let state = relay.state.clone();
    wait_until(move || state.registry.has_command_channel()).await;

    let host = HostProcessEndpoint::connect(relay.host_addr).await.unwrap();
    let host_session_id = host.session_id();
    assert_eq!(host.response().relay_port, relay.client_addr.port().to_string());
    let host_task = tokio::spawn(async move {
        let mut handler = EchoHandler::default();
        host.serve(&mut handler).await
    });
    let state = relay.state.clone();
    wait_until(move || state.registry.waiting_len() == 1).await;

    let mut client = ClientEndpoint::connect(relay.client_addr)
        .await
        .unwrap()
        .expect("client should be assigned");
    let announcement = tokio::time::timeout(IO_TIMEOUT, listener.next_announcement())
        .await
        .unwrap()
        .unwrap()
        .expect("command channel closed");
    assert_eq!(announcement, Announcement::ConnectionOpen { host_session_id });

    client.send(b"hello through the relay").await.unwrap();
    assert_eq!(recv_exactly(&mut client, 23).await, b"hello through the relay");

    drop(client);
    let announcement = listener.next_announcement().await.unwrap().unwrap();
    assert_eq!(announcement, Announcement::ConnectionDrop { host_session_id });

    let received = tokio::time::timeout(IO_TIMEOUT, host_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, 23);
    assert!(gather_metrics().contains("relayd_assignments_total"));
    relay.stop().await;
}

#[tokio::test]
async fn test_client_endpoint_without_host_is_not_assigned() {
    let relay = TestRelay::start().await;
    let _command = relay.connect_command().await;

    let client = ClientEndpoint::connect(relay.client_addr).await.unwrap();
    assert!(client.is_none());
    relay.stop().await;
}

#[tokio::test]
async fn test_agent_keeps_host_connections_parked() {
    let relay = TestRelay::start().await;

    let mut config = super::test_helpers::test_config();
    config.ports.host_process = relay.host_addr.port();
    config.ports.command = relay.command_addr.port();
    config.host_process.relay_host = "127.0.0.1".to_string();
    config.host_process.connections = 2;
    config.host_process.handler = HandlerKind::Echo;
    config.host_process.max_reconnect_delay = Duration::from_millis(200);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let agent_task = tokio::spawn(agent::run(config, async move {
        let _ = stop_rx.await;
    }));

    let state = relay.state.clone();
    wait_until(move || state.registry.waiting_len() == 2 && state.registry.has_command_channel())
        .await;

    let mut client = ClientEndpoint::connect(relay.client_addr)
        .await
        .unwrap()
        .expect("client should be assigned");
    client.send(b"ping").await.unwrap();
    assert_eq!(recv_exactly(&mut client, 4).await, b"ping");

    // The agent parks a replacement once the used connection is closed.
    drop(client);
    let state = relay.state.clone();
    wait_until(move || {
        let snapshot = state.registry.snapshot();
        snapshot.waiting.len() == 2 && snapshot.active_assignments() == 0
    })
    .await;

    stop_tx.send(()).unwrap();
    tokio::time::timeout(IO_TIMEOUT, agent_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    relay.stop().await;
}
