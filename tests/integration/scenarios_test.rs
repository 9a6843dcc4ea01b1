// tests/integration/scenarios_test.rs

//! End-to-end pairing scenarios over the split (three-port) layout.

use super::test_helpers::{Peer, TEST_GRACE, TestRelay, test_config, wait_until};
use bytes::BytesMut;
use relayd::core::metrics;
use relayd::core::protocol::{
    ClientHelloResponse, CommandType, Hello, HostProcessHelloResponse, PeerType, RelayMessage,
    encode_frame, frame_message,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_client_denied_without_command_channel() {
    let relay = TestRelay::start().await;
    let (_host, _) = relay.connect_host().await;

    let (mut client, assigned) = relay.connect_client().await;
    assert!(!assigned);
    client.expect_closed().await;

    assert_eq!(relay.state.registry.waiting_len(), 1, "the host stays queued");
    relay.stop().await;
}

#[tokio::test]
async fn test_client_denied_without_waiting_host() {
    let relay = TestRelay::start().await;
    let mut command = relay.connect_command().await;

    let (mut client, assigned) = relay.connect_client().await;
    assert!(!assigned);
    client.expect_closed().await;
    assert!(command.stays_silent(Duration::from_millis(200)).await);
    relay.stop().await;
}

#[tokio::test]
async fn test_assignment_is_announced_with_host_session() {
    let relay = TestRelay::start().await;
    let mut command = relay.connect_command().await;
    let (_host, host_response) = relay.connect_host().await;
    let assignments_before = metrics::ASSIGNMENTS_TOTAL.get();

    let (_client, assigned) = relay.connect_client().await;
    assert!(assigned);

    let announcement = command.read_command().await;
    assert_eq!(announcement.message_type, CommandType::ConnectionOpen);
    assert_eq!(announcement.host_session_id(), Some(host_response.session_id));
    assert!(metrics::ASSIGNMENTS_TOTAL.get() > assignments_before);

    let snapshot = relay.state.registry.snapshot();
    assert!(snapshot.is_consistent());
    assert_eq!(snapshot.active_assignments(), 1);
    relay.stop().await;
}

#[tokio::test]
async fn test_bytes_are_spliced_unframed_in_both_directions() {
    let relay = TestRelay::start().await;
    let _command = relay.connect_command().await;
    let (mut host, _) = relay.connect_host().await;
    let (mut client, assigned) = relay.connect_client().await;
    assert!(assigned);

    client.send_raw(b"PING").await;
    assert_eq!(host.read_exact(4).await, b"PING");

    host.send_raw(b"PONG").await;
    assert_eq!(client.read_exact(4).await, b"PONG");

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    client.send_raw(&payload).await;
    assert_eq!(host.read_exact(payload.len()).await, payload);
    relay.stop().await;
}

#[tokio::test]
async fn test_bytes_behind_client_hello_are_forwarded() {
    let relay = TestRelay::start().await;
    let _command = relay.connect_command().await;
    let (mut host, _) = relay.connect_host().await;

    let mut client = Peer::connect(relay.client_addr).await;
    let mut first_write = BytesMut::new();
    let hello = frame_message(&Hello::client()).unwrap();
    first_write.extend_from_slice(&hello);
    first_write.extend_from_slice(b"EARLY");
    client.send_raw(&first_write).await;

    let response: ClientHelloResponse = client.read_message().await;
    assert!(response.assigned);
    assert_eq!(host.read_exact(5).await, b"EARLY");
    relay.stop().await;
}

#[tokio::test]
async fn test_client_drop_closes_host_after_grace_and_announces() {
    let relay = TestRelay::start().await;
    let mut command = relay.connect_command().await;
    let (mut host, host_response) = relay.connect_host().await;
    let (client, assigned) = relay.connect_client().await;
    assert!(assigned);
    let _open = command.read_command().await;

    let dropped_at = Instant::now();
    drop(client);

    let announcement = command.read_command().await;
    assert_eq!(announcement.message_type, CommandType::ConnectionDrop);
    assert_eq!(announcement.host_session_id(), Some(host_response.session_id));

    // The host is still writable during the grace period.
    host.send_raw(b"late reply").await;
    host.expect_closed().await;
    assert!(
        dropped_at.elapsed() >= TEST_GRACE - Duration::from_millis(50),
        "host closed after {:?}",
        dropped_at.elapsed()
    );

    let snapshot = relay.state.registry.snapshot();
    assert_eq!(snapshot.active_assignments(), 0);
    assert!(snapshot.waiting.is_empty());
    relay.stop().await;
}

#[tokio::test]
async fn test_waiting_host_drop_is_silent() {
    let relay = TestRelay::start().await;
    let mut command = relay.connect_command().await;
    let (host, _) = relay.connect_host().await;

    drop(host);
    let state = relay.state.clone();
    wait_until(move || state.registry.waiting_len() == 0).await;
    assert!(command.stays_silent(Duration::from_millis(200)).await);

    // With the queue empty, the next client is turned away.
    let (_client, assigned) = relay.connect_client().await;
    assert!(!assigned);
    relay.stop().await;
}

#[tokio::test]
async fn test_assigned_host_drop_closes_client_immediately() {
    let relay = TestRelay::start().await;
    let mut command = relay.connect_command().await;
    let (host, _) = relay.connect_host().await;
    let (_spare, _) = relay.connect_host().await;
    let (mut client, assigned) = relay.connect_client().await;
    assert!(assigned);
    let _open = command.read_command().await;

    drop(host);
    client.expect_closed().await;
    assert!(command.stays_silent(Duration::from_millis(200)).await);
    assert_eq!(relay.state.registry.waiting_len(), 1, "no failover to the spare");
    relay.stop().await;
}

#[tokio::test]
async fn test_hosts_are_paired_in_arrival_order() {
    let relay = TestRelay::start().await;
    let mut command = relay.connect_command().await;
    let (_first, first) = relay.connect_host().await;
    let (_second, second) = relay.connect_host().await;

    let (_c1, a1) = relay.connect_client().await;
    let (_c2, a2) = relay.connect_client().await;
    assert!(a1 && a2);
    assert_eq!(command.read_command().await.host_session_id(), Some(first.session_id));
    assert_eq!(command.read_command().await.host_session_id(), Some(second.session_id));
    relay.stop().await;
}

#[tokio::test]
async fn test_waiting_host_bytes_go_out_ahead_of_the_next_chunk() {
    let relay = TestRelay::start().await;
    let _command = relay.connect_command().await;
    let (mut host, _) = relay.connect_host().await;

    host.send_raw(b"AB").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (mut client, assigned) = relay.connect_client().await;
    assert!(assigned);

    host.send_raw(b"CD").await;
    assert_eq!(client.read_exact(4).await, b"ABCD");
    relay.stop().await;
}

#[tokio::test]
async fn test_host_response_announces_local_address_and_client_port() {
    let relay = TestRelay::start().await;
    let (_host, response) = relay.connect_host().await;
    assert_eq!(response.relay_host, "127.0.0.1");
    assert_eq!(response.relay_port, relay.client_addr.port().to_string());
    assert!(response.session_id > 0);
    relay.stop().await;
}

#[tokio::test]
async fn test_announce_overrides_are_used() {
    let mut config = test_config();
    config.announce.host = Some("relay.example.net".to_string());
    config.announce.port = Some(4443);
    let relay = TestRelay::with_config(config).await;

    let (_host, response) = relay.connect_host().await;
    assert_eq!(response.relay_host, "relay.example.net");
    assert_eq!(response.relay_port, "4443");
    relay.stop().await;
}

#[tokio::test]
async fn test_wrong_peer_type_on_host_port_is_rejected() {
    let relay = TestRelay::start().await;
    let mut peer = Peer::connect(relay.host_addr).await;
    peer.send_message(&Hello::client()).await;
    peer.expect_closed().await;
    assert_eq!(relay.state.registry.waiting_len(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn test_unsupported_hello_version_is_rejected() {
    let relay = TestRelay::start().await;
    let mut peer = Peer::connect(relay.host_addr).await;
    peer.send_message(&Hello {
        version: 7,
        peer_type: PeerType::HostProcess,
    })
    .await;
    peer.expect_closed().await;
    assert_eq!(relay.state.registry.waiting_len(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let relay = TestRelay::start().await;
    let mut peer = Peer::connect(relay.host_addr).await;
    peer.send_raw(&u32::MAX.to_be_bytes()).await;
    peer.expect_closed().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_hello_split_across_writes_is_reassembled() {
    let relay = TestRelay::start().await;
    let mut frame = BytesMut::new();
    let payload = Hello::host_process().to_bytes().unwrap();
    encode_frame(&payload, &mut frame).unwrap();

    let mut peer = Peer::connect(relay.host_addr).await;
    for byte in frame.iter() {
        peer.send_raw(&[*byte]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let response: HostProcessHelloResponse = peer.read_message().await;
    assert!(response.session_id > 0);
    relay.stop().await;
}

#[tokio::test]
async fn test_replaced_command_channel_keeps_newest() {
    let relay = TestRelay::start().await;
    let old = relay.connect_command().await;
    let first_id = relay.state.registry.snapshot().command_channel;

    let _new = Peer::connect(relay.command_addr).await;
    let state = relay.state.clone();
    wait_until(move || state.registry.snapshot().command_channel != first_id).await;

    drop(old);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(relay.state.registry.has_command_channel());
    relay.stop().await;
}

#[tokio::test]
async fn test_command_channel_disconnect_denies_clients() {
    let relay = TestRelay::start().await;
    let command = relay.connect_command().await;
    let (_host, _) = relay.connect_host().await;

    drop(command);
    let state = relay.state.clone();
    wait_until(move || !state.registry.has_command_channel()).await;

    let (_client, assigned) = relay.connect_client().await;
    assert!(!assigned);
    relay.stop().await;
}
