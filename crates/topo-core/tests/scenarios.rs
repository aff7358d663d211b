//! End-to-end scenarios driving the topology manager the way the attach
//! protocol, the radio and the routing logic would.

use std::net::Ipv6Addr;
use topo_core::{
    Challenge, ExtAddress, FrameCounters, LinkCounters, LinkQuality, NeighborEvent, NeighborInfo,
    NeighborState, NextHop, RemovalReason, RouterId, ShortAddress, Timestamp, TopologyConfig,
    TopologyError, TopologyEvent, TopologyManager, TxOutcome,
};

const SLEEPY: ExtAddress = ExtAddress::from_u64(0x0011_2233_4455_6677);

fn rid(id: u8) -> RouterId {
    RouterId::new(id).expect("valid router id")
}

fn counters(short: u16) -> LinkCounters {
    LinkCounters {
        link_frame_counter: 0,
        mle_frame_counter: 0,
        short_address: ShortAddress(short),
    }
}

fn manager(config: TopologyConfig) -> TopologyManager {
    TopologyManager::new(config).expect("valid config")
}

fn attach_child(topology: &mut TopologyManager, ext: ExtAddress, short: u16, now: Timestamp) {
    let challenge = Challenge::new(&[0xa5; 8]).expect("challenge fits");
    topology
        .transition(ext, NeighborEvent::ParentRequest(challenge), now)
        .expect("parent request");
    topology
        .transition(ext, NeighborEvent::ChildIdRequest(counters(short)), now)
        .expect("child id request");
    topology
        .transition(ext, NeighborEvent::Attach, now)
        .expect("attach");
}

/// Poll, then report the radio outcome. Returns the polled frame's
/// sequence, frame counter and attempt along with the outcome.
fn transmit(topology: &mut TopologyManager, ext: ExtAddress, success: bool) -> (u8, u32, u8, TxOutcome) {
    let (sequence, frame_counter, attempt) = {
        let frame = topology
            .poll_received(ext, Timestamp::ZERO)
            .expect("known child")
            .expect("message pending");
        (frame.sequence, frame.frame_counter, frame.attempt)
    };
    let outcome = topology.send_completed(ext, success).expect("known child");
    (sequence, frame_counter, attempt, outcome)
}

#[test]
fn test_sleepy_child_delivery() {
    let mut topology = manager(TopologyConfig::default().with_initial_data_sequence(5));
    attach_child(&mut topology, SLEEPY, 0x0401, Timestamp::ZERO);
    topology.set_child_timeout(SLEEPY, 240).expect("timeout");

    let addresses: [Ipv6Addr; 2] = ["fd00::10".parse().unwrap(), "fd00::11".parse().unwrap()];
    for address in addresses {
        topology.register_address(SLEEPY, address).expect("address registered");
    }
    for n in 0..3u8 {
        topology
            .enqueue_indirect(SLEEPY, vec![n; 16])
            .expect("queue has room");
    }
    assert_eq!(topology.child(&SLEEPY).unwrap().indirect().queued_count(), 3);

    let (seq1, fc1, attempt1, outcome1) = transmit(&mut topology, SLEEPY, false);
    assert_eq!((seq1, attempt1, outcome1), (5, 1, TxOutcome::Retry));

    let (seq2, fc2, attempt2, outcome2) = transmit(&mut topology, SLEEPY, false);
    assert_eq!((seq2, attempt2, outcome2), (5, 2, TxOutcome::Retry));
    assert_eq!(fc1, fc2, "retransmission keeps the frame counter");

    let (seq3, fc3, attempt3, outcome3) = transmit(&mut topology, SLEEPY, true);
    assert_eq!((seq3, attempt3, outcome3), (5, 3, TxOutcome::Delivered));
    assert_eq!(fc1, fc3);

    let child = topology.child(&SLEEPY).unwrap();
    assert_eq!(child.indirect().queued_count(), 2);
    assert_eq!(child.indirect().tx_attempts(), 0);
    assert_eq!(child.addresses(), &addresses);
    assert_eq!(child.timeout, 240);

    let next = topology
        .next_message_to_send(&SLEEPY)
        .expect("known child")
        .expect("second message promoted");
    assert_eq!(next.sequence, 6);
    assert_eq!(next.payload, &[1u8; 16][..]);
    assert_ne!(next.frame_counter, fc1);
}

#[test]
fn test_router_reclaim_frees_id() {
    let config = TopologyConfig::default().with_max_routers(3);
    let mut topology = manager(config);
    topology.allocate_router(rid(1)).expect("room for 1");
    topology.allocate_router(rid(2)).expect("room for 2");
    assert_eq!(topology.allocate_router(rid(3)), Err(TopologyError::TableFull));
    assert_eq!(topology.allocate_router(rid(2)), Err(TopologyError::SlotInUse(rid(2))));

    let start = Timestamp::from_secs(50);
    topology.start_reclaim(rid(2), start).expect("reclaim starts");
    assert_eq!(topology.start_reclaim(rid(0), start), Err(TopologyError::SelfRoute));

    topology.tick(Timestamp::from_secs(149));
    assert!(topology.routers().get(rid(2)).is_some(), "grace period not over");
    assert_eq!(topology.allocate_router(rid(3)), Err(TopologyError::TableFull));

    topology.tick(Timestamp::from_secs(150));
    assert!(topology.routers().get(rid(2)).is_none());
    assert!(topology.drain_events().contains(&TopologyEvent::RouterReleased {
        router_id: rid(2),
        reason: RemovalReason::Reclaimed,
    }));

    // The reclaimed id is allocatable again, and the table is full once more
    topology.allocate_router(rid(2)).expect("reclaimed id reusable");
    assert_eq!(topology.allocate_router(rid(3)), Err(TopologyError::TableFull));
}

#[test]
fn test_reclaim_makes_room_for_new_id() {
    let mut topology = manager(TopologyConfig::default().with_max_routers(2));
    topology.allocate_router(rid(7)).expect("room");
    assert_eq!(topology.allocate_router(rid(8)), Err(TopologyError::TableFull));

    topology.start_reclaim(rid(7), Timestamp::ZERO).expect("reclaim");
    topology.tick(Timestamp::from_secs(100));
    topology.allocate_router(rid(8)).expect("freed slot reused");
}

#[test]
fn test_exhausted_attempts_count_one_link_failure() {
    let mut topology = manager(TopologyConfig::default().with_initial_data_sequence(0xfe));
    attach_child(&mut topology, SLEEPY, 0x0402, Timestamp::ZERO);
    topology.enqueue_indirect(SLEEPY, b"first".to_vec()).unwrap();
    topology.enqueue_indirect(SLEEPY, b"second".to_vec()).unwrap();

    let max = topology.config().max_tx_attempts;
    for attempt in 1..max {
        let (_, _, a, outcome) = transmit(&mut topology, SLEEPY, false);
        assert_eq!((a, outcome), (attempt, TxOutcome::Retry));
    }
    let (sequence, _, _, outcome) = transmit(&mut topology, SLEEPY, false);
    assert_eq!(outcome, TxOutcome::Dropped);
    assert_eq!(sequence, 0xfe);

    let child = topology.child(&SLEEPY).unwrap();
    assert_eq!(child.neighbor().link_failures, 1);
    assert_eq!(child.indirect().queued_count(), 1);
    assert!(topology.drain_events().contains(&TopologyEvent::IndirectDropped {
        ext_address: SLEEPY,
        sequence: 0xfe,
    }));

    // The backlog message was promoted with the next sequence number
    let (sequence, _, _, outcome) = transmit(&mut topology, SLEEPY, true);
    assert_eq!((sequence, outcome), (0xff, TxOutcome::Delivered));
    assert_eq!(topology.child(&SLEEPY).unwrap().neighbor().link_failures, 0);
}

#[test]
fn test_ack_in_order_drains_queue() {
    let mut topology = manager(TopologyConfig::default().with_initial_data_sequence(5));
    attach_child(&mut topology, SLEEPY, 0x0403, Timestamp::ZERO);
    let bound = topology.config().max_indirect_messages;

    for n in 0..bound {
        topology.enqueue_indirect(SLEEPY, vec![n as u8]).unwrap();
    }
    assert_eq!(
        topology.enqueue_indirect(SLEEPY, vec![0xff]),
        Err(TopologyError::QueueFull)
    );
    assert_eq!(topology.child(&SLEEPY).unwrap().indirect().queued_count(), bound);

    let mut sequences = Vec::new();
    for _ in 0..bound {
        let (sequence, _, _, outcome) = transmit(&mut topology, SLEEPY, true);
        assert_eq!(outcome, TxOutcome::Delivered);
        sequences.push(sequence);
    }
    assert_eq!(topology.child(&SLEEPY).unwrap().indirect().queued_count(), 0);
    assert!(sequences.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
    assert_eq!(sequences.first(), Some(&5));

    assert!(topology.poll_received(SLEEPY, Timestamp::ZERO).unwrap().is_none());
    assert_eq!(topology.send_completed(SLEEPY, true).unwrap(), TxOutcome::Ignored);
}

#[test]
fn test_identities_stay_unique() {
    let mut topology = manager(TopologyConfig::default());
    attach_child(&mut topology, SLEEPY, 0x0404, Timestamp::ZERO);

    let challenge = Challenge::new(&[1]).unwrap();
    let err = topology
        .transition(SLEEPY, NeighborEvent::ParentRequest(challenge), Timestamp::ZERO)
        .unwrap_err();
    assert!(matches!(err, TopologyError::InvalidTransition { from: NeighborState::Valid, .. }));
    assert_eq!(topology.children().len(), 1);

    // A router that shows up under a new id keeps only one link
    let peer = ExtAddress::from_u64(0xbeef);
    topology.allocate_router(rid(1)).unwrap();
    topology.allocate_router(rid(2)).unwrap();
    topology
        .transition_router(rid(1), peer, NeighborEvent::LinkAccept(counters(0x0400)), Timestamp::ZERO)
        .unwrap();
    topology
        .transition_router(rid(2), peer, NeighborEvent::LinkAccept(counters(0x0800)), Timestamp::ZERO)
        .unwrap();
    let linked: Vec<RouterId> = topology
        .routers()
        .iter()
        .filter(|r| !r.neighbor().is_free())
        .map(|r| r.id())
        .collect();
    assert_eq!(linked, vec![rid(2)]);

    // Every occupied child slot is non-Invalid and vice versa
    for (_, child) in topology.children().iter() {
        assert_ne!(child.state(), NeighborState::Invalid);
    }
}

#[test]
fn test_route_replacement_needs_strictly_better_cost() {
    let mut topology = manager(TopologyConfig::default());
    for id in [1, 2, 5] {
        topology.allocate_router(rid(id)).unwrap();
    }
    for id in [1, 2] {
        let peer = ExtAddress::from_u64(0xb000 + u64::from(id));
        topology
            .transition_router(rid(id), peer, NeighborEvent::LinkAccept(counters(u16::from(id) << 10)), Timestamp::ZERO)
            .expect("link to hop");
    }
    let now = Timestamp::from_secs(1);
    assert!(topology.update_route(rid(5), rid(1), 3, LinkQuality::Two, now).unwrap());
    assert!(!topology.update_route(rid(5), rid(2), 3, LinkQuality::Three, now).unwrap());
    assert!(!topology.update_route(rid(5), rid(2), 4, LinkQuality::Three, now).unwrap());
    assert_eq!(
        topology.best_route(rid(5)).unwrap(),
        NextHop { router_id: rid(1), cost: 3 }
    );

    assert!(topology.update_route(rid(5), rid(2), 2, LinkQuality::Three, now).unwrap());
    assert_eq!(
        topology.best_route(rid(5)).unwrap(),
        NextHop { router_id: rid(2), cost: 2 }
    );

    // Same next hop always refreshes, even when worse
    assert!(topology.update_route(rid(5), rid(2), 6, LinkQuality::One, now).unwrap());
    assert_eq!(topology.best_route(rid(5)).unwrap().cost, 6);
    assert_eq!(topology.best_route(rid(0)).unwrap().cost, 0);
    assert_eq!(topology.best_route(rid(9)), Err(TopologyError::UnknownIdentity));
}

#[test]
fn test_link_quality_follows_recent_frames() {
    let mut topology = manager(TopologyConfig::default());
    attach_child(&mut topology, SLEEPY, 0x0405, Timestamp::ZERO);

    // Sixteen frames: eight weak ones, then eight strong ones
    for n in 0..16u32 {
        let rss = if n < 8 { -95 } else { -70 };
        let frame = FrameCounters {
            key_sequence: 0,
            link_frame_counter: n,
            mle_frame_counter: None,
        };
        topology
            .record_frame_heard(SLEEPY, rss, &frame, Timestamp::from_millis(u64::from(n)))
            .expect("fresh counters");
    }

    let neighbor = topology.lookup(&SLEEPY).expect("known");
    let info = neighbor.link_info();
    assert_eq!(info.sample_count(), 8);
    assert_eq!(info.average_rss(), Some(-70.0));
    assert_eq!(info.link_margin(), 30);
    assert_eq!(info.link_quality(), LinkQuality::Three);
}
