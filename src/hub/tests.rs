//! Hub dispatch tests
//!
//! These exercise the routing core directly through `handle_command`, which
//! is exactly what the hub loop does per event, so channel plumbing stays
//! out of the way of the properties under test.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::*;

fn new_hub(publish_capacity: usize) -> (Hub, HubHandle, mpsc::Receiver<Bytes>) {
    let (publish_tx, publish_rx) = mpsc::channel(publish_capacity);
    let (hub, handle) = Hub::new(publish_tx);
    (hub, handle, publish_rx)
}

/// Register a client with a queue of the given capacity, returning its
/// receive side.
fn join(hub: &mut Hub, id: ClientId, room: &str, capacity: usize) -> mpsc::Receiver<Bytes> {
    let (sender, receiver) = mpsc::channel(capacity);
    hub.handle_command(HubCommand::Register(ClientHandle {
        id,
        room_id: room.to_string(),
        sender,
    }));
    receiver
}

fn route(hub: &mut Hub, room: &str, payload: &[u8], origin: MessageOrigin) {
    hub.handle_command(HubCommand::Route(RoutingEvent {
        room_id: room.to_string(),
        payload: Bytes::copy_from_slice(payload),
        origin,
    }));
}

#[test]
fn register_creates_room_lazily() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    assert!(hub.rooms.is_empty());

    let _rx = join(&mut hub, 1, "general", 8);
    assert_eq!(hub.rooms.len(), 1);
    assert!(hub.rooms["general"].contains(1));
    assert_eq!(hub.memberships.get(&1), Some(&"general".to_string()));
}

#[test]
fn unregister_removes_membership_and_empty_room() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let _rx = join(&mut hub, 1, "general", 8);

    hub.handle_command(HubCommand::Unregister(1));
    assert!(hub.memberships.is_empty());
    assert!(hub.rooms.is_empty());
}

#[test]
fn unregister_is_idempotent() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let _rx1 = join(&mut hub, 1, "general", 8);
    let _rx2 = join(&mut hub, 2, "general", 8);

    hub.handle_command(HubCommand::Unregister(1));
    hub.handle_command(HubCommand::Unregister(1));
    hub.handle_command(HubCommand::Unregister(99));

    assert_eq!(hub.rooms["general"].len(), 1);
    assert!(hub.rooms["general"].contains(2));
}

#[test]
fn unregister_closes_outbound_queue() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let mut rx = join(&mut hub, 1, "general", 8);

    hub.handle_command(HubCommand::Unregister(1));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
}

#[test]
fn local_event_publishes_and_never_fans_out() {
    let (mut hub, _handle, mut publish_rx) = new_hub(16);
    let mut rx = join(&mut hub, 1, "general", 8);

    route(&mut hub, "general", b"hi", MessageOrigin::Local);

    // Exactly one publish carrying the wire envelope
    let published = publish_rx.try_recv().expect("expected one publish");
    let envelope = crate::protocol::Envelope::decode(&published).unwrap();
    assert_eq!(envelope.room_id, "general");
    assert_eq!(envelope.message, "hi");
    assert_eq!(publish_rx.try_recv(), Err(TryRecvError::Empty));

    // Zero direct writes to any client queue
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn external_event_fans_out_and_never_publishes() {
    let (mut hub, _handle, mut publish_rx) = new_hub(16);
    let mut rx = join(&mut hub, 1, "general", 8);

    route(&mut hub, "general", b"hi", MessageOrigin::External);

    assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"hi"));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(publish_rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn fan_out_reaches_every_member_and_nobody_else() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let mut general: Vec<_> = (1..=3).map(|id| join(&mut hub, id, "general", 8)).collect();
    let mut other = join(&mut hub, 4, "other", 8);

    route(&mut hub, "general", b"fan", MessageOrigin::External);

    for rx in &mut general {
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"fan"));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
    assert_eq!(other.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn unregistered_member_no_longer_receives() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let mut rx1 = join(&mut hub, 1, "general", 8);
    let mut rx2 = join(&mut hub, 2, "general", 8);

    hub.handle_command(HubCommand::Unregister(2));
    route(&mut hub, "general", b"hello", MessageOrigin::External);

    assert_eq!(rx1.try_recv().unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(rx2.try_recv(), Err(TryRecvError::Disconnected));
}

#[test]
fn route_to_unknown_room_is_a_noop() {
    let (mut hub, _handle, mut publish_rx) = new_hub(16);
    let mut rx = join(&mut hub, 1, "general", 8);

    route(&mut hub, "nowhere", b"void", MessageOrigin::External);

    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(publish_rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn slow_consumer_is_evicted_on_fan_out() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let mut slow = join(&mut hub, 1, "general", 1);
    let mut fast = join(&mut hub, 2, "general", 8);

    // First fan-out fills the slow client's queue to capacity.
    route(&mut hub, "general", b"one", MessageOrigin::External);
    // Second fan-out finds it full and evicts it.
    route(&mut hub, "general", b"two", MessageOrigin::External);

    assert!(!hub.rooms["general"].contains(1));
    assert!(hub.memberships.get(&1).is_none());
    assert!(hub.rooms["general"].contains(2));

    // The fast client saw both messages; the slow one keeps what fit and
    // then finds its queue closed.
    assert_eq!(fast.try_recv().unwrap(), Bytes::from_static(b"one"));
    assert_eq!(fast.try_recv().unwrap(), Bytes::from_static(b"two"));
    assert_eq!(slow.try_recv().unwrap(), Bytes::from_static(b"one"));
    assert_eq!(slow.try_recv(), Err(TryRecvError::Disconnected));
}

#[test]
fn evicting_the_last_member_removes_the_room() {
    let (mut hub, _handle, _publish_rx) = new_hub(16);
    let _slow = join(&mut hub, 1, "general", 1);

    route(&mut hub, "general", b"one", MessageOrigin::External);
    route(&mut hub, "general", b"two", MessageOrigin::External);

    assert!(hub.rooms.is_empty());
    assert!(hub.memberships.is_empty());
}

#[test]
fn full_publish_queue_drops_the_event() {
    let (mut hub, _handle, mut publish_rx) = new_hub(1);
    let _rx = join(&mut hub, 1, "general", 8);

    route(&mut hub, "general", b"first", MessageOrigin::Local);
    route(&mut hub, "general", b"second", MessageOrigin::Local);

    // Only the first made it; the second was dropped, not blocked on.
    let published = publish_rx.try_recv().unwrap();
    let envelope = crate::protocol::Envelope::decode(&published).unwrap();
    assert_eq!(envelope.message, "first");
    assert_eq!(publish_rx.try_recv(), Err(TryRecvError::Empty));
}

/// Scenario from the relay contract: a local send round-trips through the
/// broker before the sender's own room sees it.
#[test]
fn local_send_then_broker_echo() {
    let (mut hub, _handle, mut publish_rx) = new_hub(16);
    let mut rx = join(&mut hub, 1, "general", 8);

    route(&mut hub, "general", b"hi", MessageOrigin::Local);

    let published = publish_rx.try_recv().unwrap();
    let envelope = crate::protocol::Envelope::decode(&published).unwrap();
    assert_eq!(envelope.room_id, "general");
    assert_eq!(envelope.message, "hi");
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

    // The broker delivers the same envelope back.
    route(
        &mut hub,
        &envelope.room_id,
        envelope.message.as_bytes(),
        MessageOrigin::External,
    );
    assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"hi"));
    assert_eq!(publish_rx.try_recv(), Err(TryRecvError::Empty));
}

/// End-to-end through the handle and the real hub loop: a registration is
/// visible to any fan-out processed after it.
#[tokio::test]
async fn registration_visible_through_the_loop() {
    let (publish_tx, _publish_rx) = mpsc::channel(16);
    let (hub, handle) = Hub::new(publish_tx);
    tokio::spawn(hub.run());

    let (sender, mut receiver) = mpsc::channel(8);
    handle
        .register(ClientHandle {
            id: handle.next_client_id(),
            room_id: "general".to_string(),
            sender,
        })
        .await;
    handle
        .route_external("general", Bytes::from_static(b"welcome"))
        .await;

    let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), receiver.recv())
        .await
        .expect("timed out waiting for fan-out")
        .expect("queue closed unexpectedly");
    assert_eq!(delivered, Bytes::from_static(b"welcome"));
}

#[derive(Debug, Clone)]
enum MembershipOp {
    Register { id: ClientId, room: u8 },
    Unregister { id: ClientId },
}

fn membership_op() -> impl Strategy<Value = MembershipOp> {
    prop_oneof![
        (0u64..8, 0u8..3).prop_map(|(id, room)| MembershipOp::Register { id, room }),
        (0u64..8).prop_map(|id| MembershipOp::Unregister { id }),
    ]
}

proptest! {
    /// For any sequence of register/unregister calls, a client appears in
    /// exactly one room's membership iff it has been registered and not yet
    /// unregistered.
    #[test]
    fn membership_invariant(ops in proptest::collection::vec(membership_op(), 0..64)) {
        let (publish_tx, _publish_rx) = mpsc::channel(16);
        let (mut hub, _handle) = Hub::new(publish_tx);
        let mut model: std::collections::HashMap<ClientId, String> = std::collections::HashMap::new();
        let mut queues = Vec::new();

        for op in ops {
            match op {
                MembershipOp::Register { id, room } => {
                    // Registration is one-shot per connection lifecycle.
                    if model.contains_key(&id) {
                        continue;
                    }
                    let room = format!("room-{}", room);
                    let (sender, receiver) = mpsc::channel(4);
                    queues.push(receiver);
                    hub.handle_command(HubCommand::Register(ClientHandle {
                        id,
                        room_id: room.clone(),
                        sender,
                    }));
                    model.insert(id, room);
                }
                MembershipOp::Unregister { id } => {
                    hub.handle_command(HubCommand::Unregister(id));
                    model.remove(&id);
                }
            }

            for (id, room) in &model {
                let holding: Vec<_> = hub
                    .rooms
                    .iter()
                    .filter(|(_, r)| r.contains(*id))
                    .map(|(name, _)| name.clone())
                    .collect();
                prop_assert_eq!(&holding, &vec![room.clone()]);
                prop_assert_eq!(hub.memberships.get(id), Some(room));
            }
            for (_, room) in hub.rooms.iter() {
                prop_assert!(!room.is_empty());
            }
            prop_assert_eq!(
                hub.rooms.values().map(Room::len).sum::<usize>(),
                model.len()
            );
        }
    }
}
