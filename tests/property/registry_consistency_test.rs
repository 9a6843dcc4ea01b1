// tests/property/registry_consistency_test.rs

//! The registry stays internally consistent, and pairs hosts in arrival order, under any
//! interleaving of hellos, assignments and disconnects.

use proptest::prelude::*;
use relayd::core::{CommandChannel, Outbound, PeerHandle, SessionId, SessionRegistry};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const COMMAND_SESSION: SessionId = 200;

#[derive(Debug, Clone)]
enum Event {
    HostHello(SessionId),
    ClientHello(SessionId),
    ClientDrop(SessionId),
    HostDrop(SessionId),
    CommandConnect,
    CommandDrop,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => (1u64..=8).prop_map(Event::HostHello),
        3 => (101u64..=108).prop_map(Event::ClientHello),
        2 => (101u64..=108).prop_map(Event::ClientDrop),
        2 => (1u64..=8).prop_map(Event::HostDrop),
        1 => Just(Event::CommandConnect),
        1 => Just(Event::CommandDrop),
    ]
}

fn handle(session_id: SessionId, receivers: &mut Vec<UnboundedReceiver<Outbound>>) -> PeerHandle {
    let addr = format!("127.0.0.1:{}", 30000 + session_id).parse().unwrap();
    let (handle, rx) = PeerHandle::new(session_id, addr);
    receivers.push(rx);
    handle
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_registry_matches_fifo_model(events in prop::collection::vec(event(), 1..64)) {
        let registry = SessionRegistry::new(Duration::from_millis(100));
        let mut receivers = Vec::new();

        // A plain model of the expected bookkeeping.
        let mut waiting: VecDeque<SessionId> = VecDeque::new();
        let mut pairs: HashMap<SessionId, SessionId> = HashMap::new();
        let mut command = false;

        for event in events {
            match event {
                Event::HostHello(id) => {
                    let fresh = !waiting.contains(&id) && !pairs.values().any(|h| *h == id);
                    let queued = registry.queue_waiting_host(handle(id, &mut receivers));
                    prop_assert_eq!(queued, fresh);
                    if fresh {
                        waiting.push_back(id);
                    }
                }
                Event::ClientHello(id) => {
                    let assigned = registry.assign_client(&handle(id, &mut receivers));
                    let expected = command && !pairs.contains_key(&id) && !waiting.is_empty();
                    prop_assert_eq!(assigned, expected);
                    if expected {
                        let host = waiting.pop_front().unwrap();
                        prop_assert_eq!(
                            registry.get_assigned_host(id).map(|h| h.session_id()),
                            Some(host)
                        );
                        pairs.insert(id, host);
                    }
                }
                Event::ClientDrop(id) => {
                    let released = registry.release_client(id);
                    prop_assert_eq!(released, pairs.remove(&id));
                }
                Event::HostDrop(id) => {
                    registry.release_host(id);
                    waiting.retain(|h| *h != id);
                    pairs.retain(|_, h| *h != id);
                }
                Event::CommandConnect => {
                    registry.set_command_channel(CommandChannel::new(handle(COMMAND_SESSION, &mut receivers)));
                    command = true;
                }
                Event::CommandDrop => {
                    registry.clear_command_channel(COMMAND_SESSION);
                    command = false;
                }
            }

            let snapshot = registry.snapshot();
            prop_assert!(snapshot.is_consistent(), "inconsistent: {:?}", snapshot);
            prop_assert_eq!(&snapshot.waiting, &waiting.iter().copied().collect::<Vec<_>>());
            prop_assert_eq!(snapshot.active_assignments(), pairs.len());
            prop_assert_eq!(registry.has_command_channel(), command);
        }
    }
}
