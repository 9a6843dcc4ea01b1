// tests/property/framing_test.rs

//! Frames and typed messages survive being split at arbitrary byte boundaries.

use bytes::BytesMut;
use proptest::prelude::*;
use relayd::core::protocol::{
    Command, DEFAULT_MAX_FRAME_LEN, Hello, HostProcessHelloResponse, PeerType, PROTOCOL_VERSION,
    RelayMessage, encode_frame, frame_message, read_message, read_typed,
};

fn hello() -> impl Strategy<Value = Hello> {
    prop_oneof![Just(PeerType::Client), Just(PeerType::HostProcess)].prop_map(|peer_type| Hello {
        version: PROTOCOL_VERSION,
        peer_type,
    })
}

fn command() -> impl Strategy<Value = Command> {
    (any::<bool>(), any::<u64>()).prop_map(|(open, id)| {
        if open {
            Command::connection_open(id)
        } else {
            Command::connection_drop(id)
        }
    })
}

fn host_process_response() -> impl Strategy<Value = HostProcessHelloResponse> {
    (any::<u64>(), "[a-z0-9.-]{1,64}", 1u16..).prop_map(|(session_id, relay_host, port)| {
        HostProcessHelloResponse {
            session_id,
            relay_host,
            relay_port: port.to_string(),
        }
    })
}

/// Frames `messages` back to back, feeds them in `chunk_sizes` pieces and decodes them again.
fn reassemble<M: RelayMessage>(messages: &[M], chunk_sizes: &[usize]) -> Vec<M> {
    let mut wire = BytesMut::new();
    for message in messages {
        wire.extend_from_slice(&frame_message(message).unwrap());
    }

    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut sizes = chunk_sizes.iter().cycle();
    while offset < wire.len() {
        let size = (*sizes.next().unwrap()).min(wire.len() - offset);
        buf.extend_from_slice(&wire[offset..offset + size]);
        offset += size;
        while let Some(message) = read_typed::<M>(&mut buf, DEFAULT_MAX_FRAME_LEN).unwrap() {
            decoded.push(message);
        }
    }
    assert!(buf.is_empty());
    decoded
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_frames_reassemble_across_arbitrary_chunks(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..8),
        chunk_sizes in prop::collection::vec(1usize..64, 1..32),
        trailing in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let mut wire = BytesMut::new();
        for payload in &payloads {
            encode_frame(payload, &mut wire).unwrap();
        }
        let frames_len = wire.len();
        wire.extend_from_slice(&trailing);

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();
        while offset < frames_len {
            let size = (*sizes.next().unwrap()).min(wire.len() - offset);
            buf.extend_from_slice(&wire[offset..offset + size]);
            offset += size;
            while decoded.len() < payloads.len() {
                match read_message(&mut buf, DEFAULT_MAX_FRAME_LEN).unwrap() {
                    Some(payload) => decoded.push(payload.to_vec()),
                    None => break,
                }
            }
        }

        prop_assert_eq!(&decoded, &payloads);
        // Whatever followed the last frame is left untouched for the raw phase.
        buf.extend_from_slice(&wire[offset..]);
        prop_assert_eq!(&buf[..], &trailing[..]);
    }

    #[test]
    fn test_hellos_survive_chunked_delivery(
        messages in prop::collection::vec(hello(), 1..8),
        chunk_sizes in prop::collection::vec(1usize..16, 1..16),
    ) {
        prop_assert_eq!(reassemble(&messages, &chunk_sizes), messages);
    }

    #[test]
    fn test_commands_survive_chunked_delivery(
        messages in prop::collection::vec(command(), 1..8),
        chunk_sizes in prop::collection::vec(1usize..16, 1..16),
    ) {
        prop_assert_eq!(reassemble(&messages, &chunk_sizes), messages);
    }

    #[test]
    fn test_host_process_responses_survive_chunked_delivery(
        messages in prop::collection::vec(host_process_response(), 1..8),
        chunk_sizes in prop::collection::vec(1usize..32, 1..16),
    ) {
        prop_assert_eq!(reassemble(&messages, &chunk_sizes), messages);
    }

    #[test]
    fn test_oversized_length_is_rejected_before_payload_arrives(
        max in 1usize..1024,
        excess in 1usize..1024,
    ) {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((max + excess) as u32).to_be_bytes());
        prop_assert!(read_message(&mut buf, max).is_err());
    }
}
