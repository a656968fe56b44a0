// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use paxos::{AppCommand, LocalPaxosEndpoint, Paxos, Status};
use tracing::Level;

pub type Peer<V> = Arc<Paxos<V, LocalPaxosEndpoint<V>>>;

/// Installs a tracer once per test binary; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{fmt::time::ChronoLocal, FmtSubscriber};

    let _ = FmtSubscriber::builder()
        .with_timer(ChronoLocal::with_format("[%Mm %Ss]".to_string()))
        .with_max_level(Level::INFO)
        .try_init();
}

/// Number of peers that decided `seq`. Panics if two of them disagree.
pub fn ndecided<V: AppCommand>(peers: &[Peer<V>], seq: u64) -> usize {
    let mut decided: Option<V> = None;
    let mut count = 0;
    for peer in peers {
        if let Status::Decided(value) = peer.status(seq) {
            if let Some(previous) = &decided {
                assert_eq!(previous, &value, "peers decided different values for {}", seq);
            }
            decided = Some(value);
            count += 1;
        }
    }
    count
}

/// Waits until at least `wanted` peers decided `seq` and returns how many did.
pub fn wait_n<V: AppCommand>(peers: &[Peer<V>], seq: u64, wanted: usize) -> usize {
    let mut interval = Duration::from_millis(10);
    for _ in 0..30 {
        if ndecided(peers, seq) >= wanted {
            break;
        }
        thread::sleep(interval);
        if interval < Duration::from_secs(1) {
            interval *= 2;
        }
    }
    let count = ndecided(peers, seq);
    assert!(count >= wanted, "too few decided for {}: {} < {}", seq, count, wanted);
    count
}

pub fn wait_majority<V: AppCommand>(peers: &[Peer<V>], seq: u64) -> usize {
    wait_n(peers, seq, peers.len() / 2 + 1)
}

/// The value some peer decided for `seq`.
pub fn decided_value<V: AppCommand>(peers: &[Peer<V>], seq: u64) -> Option<V> {
    peers.iter().find_map(|peer| peer.status(seq).decided())
}
