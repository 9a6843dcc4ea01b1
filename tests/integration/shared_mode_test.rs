// tests/integration/shared_mode_test.rs

//! The legacy two-port layout, where the hello decides whether a data-port peer is a client
//! or a host-process.

use super::test_helpers::{TestRelay, test_config};
use relayd::config::ListenerMode;
use relayd::core::protocol::CommandType;

async fn start_shared() -> TestRelay {
    let mut config = test_config();
    config.mode = ListenerMode::Shared;
    let relay = TestRelay::with_config(config).await;
    assert_eq!(relay.host_addr, relay.client_addr);
    relay
}

#[tokio::test]
async fn test_shared_port_pairs_client_with_host() {
    let relay = start_shared().await;
    let mut command = relay.connect_command().await;
    let (mut host, response) = relay.connect_host().await;
    assert_eq!(response.relay_port, relay.host_addr.port().to_string());

    let (mut client, assigned) = relay.connect_client().await;
    assert!(assigned);
    let announcement = command.read_command().await;
    assert_eq!(announcement.message_type, CommandType::ConnectionOpen);
    assert_eq!(announcement.host_session_id(), Some(response.session_id));

    client.send_raw(b"PING").await;
    assert_eq!(host.read_exact(4).await, b"PING");
    host.send_raw(b"PONG").await;
    assert_eq!(client.read_exact(4).await, b"PONG");
    relay.stop().await;
}

#[tokio::test]
async fn test_shared_port_denies_without_host() {
    let relay = start_shared().await;
    let _command = relay.connect_command().await;

    let (mut client, assigned) = relay.connect_client().await;
    assert!(!assigned);
    client.expect_closed().await;
    assert!(relay.state.registry.snapshot().clients.is_empty());
    relay.stop().await;
}

#[tokio::test]
async fn test_shared_port_client_drop_releases_assignment() {
    let relay = start_shared().await;
    let mut command = relay.connect_command().await;
    let (mut host, response) = relay.connect_host().await;
    let (client, assigned) = relay.connect_client().await;
    assert!(assigned);
    let _open = command.read_command().await;

    drop(client);
    let announcement = command.read_command().await;
    assert_eq!(announcement.message_type, CommandType::ConnectionDrop);
    assert_eq!(announcement.host_session_id(), Some(response.session_id));
    host.expect_closed().await;
    relay.stop().await;
}
