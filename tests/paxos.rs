// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

mod common;

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use paxos::udp_network::bind_local;
use paxos::{start_replicas, Config, Paxos, PaxosMsg, PaxosReply, State, Status, UdpNetworkNode};

use common::*;

#[test]
fn single_proposer() {
    init_tracing();
    let (_net, peers) = start_replicas::<String>(3, Config::default());
    peers[0].start(0, "hello".to_string());
    assert_eq!(wait_n(&peers, 0, 3), 3);
    assert_eq!(decided_value(&peers, 0), Some("hello".to_string()));
}

#[test]
fn many_proposers_same_value() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    for peer in &peers {
        peer.start(1, 77);
    }
    wait_n(&peers, 1, 3);
    assert_eq!(decided_value(&peers, 1), Some(77));
}

#[test]
fn many_proposers_different_values() {
    let (_net, peers) = start_replicas::<u64>(5, Config::default());
    for (me, peer) in peers.iter().enumerate() {
        peer.start(2, 100 + me as u64);
    }
    wait_n(&peers, 2, 5);
    let value = decided_value(&peers, 2).unwrap();
    assert!((100..105).contains(&value), "decided a value nobody proposed: {}", value);
}

#[test]
fn out_of_order_instances() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    peers[0].start(7, 700);
    peers[0].start(6, 600);
    peers[1].start(5, 500);
    wait_n(&peers, 7, 3);
    peers[0].start(4, 400);
    peers[1].start(3, 300);
    for seq in 3..8 {
        wait_n(&peers, seq, 3);
        assert_eq!(decided_value(&peers, seq), Some(seq * 100));
    }
    assert!(peers.iter().all(|p| p.max() == Some(7)));
}

#[test]
fn deaf_proposer_still_reaches_a_majority() {
    let (net, peers) = start_replicas::<String>(5, Config::default());
    // peer 0 can no longer send to 1 and 2
    net.sever(0, 1);
    net.sever(0, 2);

    peers[0].start(0, "deaf".to_string());
    wait_majority(&peers, 0);
    assert_eq!(ndecided(&peers[1..3], 0), 0);

    // the cut off peers learn the value by proposing for the slot themselves
    peers[1].start(0, "late".to_string());
    wait_n(&peers, 0, 4);
    assert_eq!(peers[1].status(0), Status::Decided("deaf".to_string()));
}

#[test]
fn minority_cannot_decide() {
    let (net, peers) = start_replicas::<u64>(5, Config::default());
    for from in 0..5 {
        for to in 0..5 {
            let same_side = (from < 2) == (to < 2);
            if !same_side {
                net.sever(from, to);
            }
        }
    }

    peers[0].start(0, 1);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(ndecided(&peers, 0), 0);

    peers[2].start(1, 2);
    wait_n(&peers[2..], 1, 3);
    assert_eq!(ndecided(&peers[..2], 1), 0);

    net.heal_all();
    wait_n(&peers, 0, 5);
    assert_eq!(decided_value(&peers, 0), Some(1));
}

#[test]
fn many_instances_concurrently() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    let instances = 50;
    for seq in 0..instances {
        for (me, peer) in peers.iter().enumerate() {
            peer.start(seq, seq * 10 + me as u64);
        }
    }
    for seq in 0..instances {
        wait_n(&peers, seq, 3);
        let value = decided_value(&peers, seq).unwrap();
        assert_eq!(value / 10, seq);
    }
}

#[test]
fn agreement_on_an_unreliable_network() {
    init_tracing();
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    for peer in &peers {
        peer.set_unreliable();
        assert!(peer.is_unreliable());
    }
    let instances = 20;
    for seq in 0..instances {
        let proposer = &peers[seq as usize % 3];
        proposer.start(seq, seq);
        if seq % 4 == 0 {
            peers[(seq as usize + 1) % 3].start(seq, seq + 1000);
        }
    }
    for seq in 0..instances {
        wait_n(&peers, seq, 1);
    }
    // the Decide broadcast is best effort, peers that missed it catch up by
    // proposing for the slot themselves
    for seq in 0..instances {
        for peer in &peers {
            peer.start(seq, seq + 2000);
        }
    }
    for seq in 0..instances {
        wait_n(&peers, seq, 3);
        let value = decided_value(&peers, seq).unwrap();
        assert!(value == seq || value == seq + 1000, "unexpected value {} for {}", value, seq);
    }
}

#[test]
fn done_and_min_forget_instances() {
    let (_net, peers) = start_replicas::<String>(3, Config::default());
    for seq in 0..10 {
        peers[seq as usize % 3].start(seq, format!("v{}", seq));
        wait_n(&peers, seq, 3);
    }
    assert!(peers.iter().all(|p| p.min() == 0));
    assert!(peers.iter().all(|p| p.instance_count() == 10));

    for peer in &peers {
        peer.done(4);
    }
    // watermarks travel on the next messages each peer sends
    for (me, seq) in (10..13).enumerate() {
        peers[me].start(seq, format!("v{}", seq));
        wait_n(&peers, seq, 3);
    }

    for peer in &peers {
        assert_eq!(peer.min(), 5);
        assert_eq!(peer.status(4), Status::Forgotten);
        assert_eq!(peer.status(3).state(), State::Forgotten);
        assert_eq!(peer.status(5), Status::Decided("v5".to_string()));
        assert_eq!(peer.instance_count(), 8);
    }
}

#[test]
fn min_waits_for_silent_peers() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    peers[2].kill();
    for seq in 0..5 {
        peers[0].start(seq, seq);
        wait_n(&peers[..2], seq, 2);
    }
    peers[0].done(4);
    peers[1].done(4);
    peers[0].start(5, 5);
    wait_n(&peers[..2], 5, 2);
    peers[1].start(6, 6);
    wait_n(&peers[..2], 6, 2);

    assert_eq!(peers[0].min(), 0);
    assert_eq!(peers[1].min(), 0);
    assert_eq!(peers[0].status(0), Status::Decided(0));
}

#[test]
fn forgotten_instances_are_not_revived() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    peers[0].start(0, 1);
    wait_n(&peers, 0, 3);
    for peer in &peers {
        peer.done(0);
    }
    for (me, seq) in (1..4).enumerate() {
        peers[me].start(seq, seq + 1);
        wait_n(&peers, seq, 3);
    }
    assert!(peers.iter().all(|p| p.min() == 1));

    peers[0].start(0, 99);
    thread::sleep(Duration::from_millis(100));
    for peer in &peers {
        assert_eq!(peer.status(0), Status::Forgotten);
        assert_ne!(peer.status(0).decided(), Some(99));
    }
}

#[test]
fn min_never_decreases() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    let mut mins = vec![0; 3];
    for seq in 0..12 {
        peers[seq as usize % 3].start(seq, seq);
        wait_n(&peers, seq, 3);
        if seq % 3 == 2 {
            for peer in &peers {
                peer.done(seq - 1);
            }
        }
        for (peer, last) in peers.iter().zip(mins.iter_mut()) {
            let min = peer.min();
            assert!(min >= *last);
            *last = min;
        }
    }
    assert!(mins.iter().any(|&min| min > 0));
}

#[test]
fn killed_peer_stops_participating() {
    let (_net, peers) = start_replicas::<u64>(3, Config::default());
    peers[1].kill();
    peers[2].kill();
    peers[0].start(0, 5);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(ndecided(&peers, 0), 0);
    assert_eq!(peers[0].status(0), Status::Pending);
}

#[test]
fn every_decision_was_proposed() {
    let (_net, peers) = start_replicas::<u64>(5, Config::default());
    let mut proposed = HashSet::new();
    for seq in 0..10 {
        for (me, peer) in peers.iter().enumerate().filter(|(me, _)| (*me as u64 + seq) % 2 == 0) {
            let value = seq * 100 + me as u64;
            proposed.insert(value);
            peer.start(seq, value);
        }
    }
    for seq in 0..10 {
        wait_n(&peers, seq, 5);
        let value = decided_value(&peers, seq).unwrap();
        assert!(proposed.contains(&value));
        assert_eq!(value / 100, seq);
    }
}

#[test]
fn agreement_over_udp() {
    type Node = UdpNetworkNode<PaxosMsg<u64>, PaxosReply<u64>>;

    let config = Config::default();
    let sockets = bind_local(3).unwrap();
    let addrs: Vec<_> = sockets.iter().map(|s| s.local_addr().unwrap()).collect();
    let peers: Vec<_> = sockets
        .into_iter()
        .enumerate()
        .map(|(me, socket)| {
            let px: std::sync::Arc<Paxos<u64, Node>> = Paxos::new(me, Node::new(Some(me), addrs.clone(), &config), config);
            px.transport().serve(socket, &px).unwrap();
            px
        })
        .collect();

    peers[1].start(0, 11);
    peers[2].start(1, 12);
    for (seq, value) in vec![(0, 11), (1, 12)] {
        let mut decided = 0;
        for _ in 0..200 {
            decided = peers.iter().filter(|p| p.status(seq) == Status::Decided(value)).count();
            if decided == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(decided, 3, "instance {} not decided everywhere", seq);
    }
}
