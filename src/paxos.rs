// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! The Paxos engine of a single peer.
//!
//! A peer plays all roles at once: it answers acceptor requests from the
//! network, runs one proposer thread per [`Paxos::start`] call and keeps
//! track of which instances every peer is done with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::instance::{InstanceStore, Status};
use crate::network::{Handler, Transport};
use crate::proposer::Proposer;
use crate::protocol::{PaxosMsg, PaxosReply};
use crate::AppCommand;

/// Handles all Paxos related state for a single peer,
/// acting as proposer, acceptor and learner.
pub struct Paxos<V: AppCommand, T> {
    me: usize,
    peers: usize,
    config: Config,
    store: Mutex<InstanceStore<V>>,
    transport: T,
    dead: AtomicBool,
    unreliable: AtomicBool,
}

impl<V, T> Paxos<V, T>
where
    V: AppCommand,
    T: Transport<PaxosMsg<V>, PaxosReply<V>> + 'static,
{
    /// Creates peer `me` of the group reachable through `transport`.
    ///
    /// At the time of creation the peer knows of no instances and assumes
    /// nobody is done with anything.
    pub fn new(me: usize, transport: T, config: Config) -> Arc<Self> {
        let peers = transport.size();
        if me >= peers {
            warn!("Peer {} is outside its group of {} and will never propose", me, peers);
        }
        Arc::new(Self {
            me,
            peers,
            config,
            store: Mutex::new(InstanceStore::new(me, peers)),
            transport,
            dead: AtomicBool::new(false),
            unreliable: AtomicBool::new(false),
        })
    }

    pub fn me(&self) -> usize {
        self.me
    }

    pub fn peers(&self) -> usize {
        self.peers
    }

    pub fn majority(&self) -> usize {
        self.peers / 2 + 1
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Starts agreement on instance `seq` with proposed value `value` and
    /// returns immediately. Use [`Paxos::status`] to learn the outcome.
    pub fn start(self: &Arc<Self>, seq: u64, value: V) {
        if self.is_dead() {
            return;
        }
        if self.me >= self.peers {
            error!("Peer {} cannot propose for [{}] in a group of {}", self.me, seq, self.peers);
            return;
        }
        let proposer = Proposer::new(Arc::clone(self), seq, value);
        let spawned = thread::Builder::new()
            .name(format!("proposer-{}-{}", self.me, seq))
            .spawn(move || proposer.run());
        if let Err(e) = spawned {
            error!("Failed to spawn proposer for [{}]: {:?}", seq, e);
        }
    }

    /// Whether this peer thinks instance `seq` was decided, and on what.
    /// Only inspects local state.
    pub fn status(&self, seq: u64) -> Status<V> {
        self.store.lock().status(seq)
    }

    /// The application on this peer is done with all instances `<= seq`.
    pub fn done(&self, seq: u64) {
        self.store.lock().done(seq);
    }

    /// Highest instance sequence known to this peer.
    pub fn max(&self) -> Option<u64> {
        self.store.lock().max()
    }

    /// One more than the lowest sequence any peer declared done. Instances
    /// below this are forgotten as a side effect.
    ///
    /// Watermarks travel piggybacked on protocol messages, so `min` cannot
    /// advance until every peer has been heard from. A dead or partitioned
    /// peer holds back reclamation, which keeps around the instances it will
    /// need to catch up.
    pub fn min(&self) -> u64 {
        self.store.lock().min()
    }

    /// Number of instances currently held in memory.
    pub fn instance_count(&self) -> usize {
        self.store.lock().len()
    }

    /// Stops this peer from answering requests and from proposing.
    pub fn kill(&self) {
        info!("Peer {} killed", self.me);
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Makes the network randomly drop and delay messages to this peer.
    pub fn set_unreliable(&self) {
        self.unreliable.store(true, Ordering::SeqCst);
        self.transport.set_unreliable(true);
    }

    pub fn is_unreliable(&self) -> bool {
        self.unreliable.load(Ordering::SeqCst)
    }

    pub(crate) fn local_done(&self) -> Option<u64> {
        self.store.lock().local_done()
    }

    /// Parses the message and calls the acceptor handler for its type.
    pub(crate) fn handle_paxos_message(&self, msg: PaxosMsg<V>) -> PaxosReply<V> {
        let mut store = self.store.lock();
        match msg {
            PaxosMsg::Prepare(req) => PaxosReply::Prepare(store.prepare(req)),
            PaxosMsg::Accept(req) => PaxosReply::Accept(store.accept(req)),
            PaxosMsg::Decide(req) => PaxosReply::Decide(store.decide(req)),
        }
    }

    /// Sends `msg` to every peer, the local one through a direct call, and
    /// collects whatever responses come back.
    pub(crate) fn broadcast(&self, msg: &PaxosMsg<V>) -> Vec<PaxosReply<V>> {
        (0..self.peers)
            .filter_map(|id| {
                if id == self.me {
                    Some(self.handle_paxos_message(msg.clone()))
                } else {
                    self.transport.call(id, msg)
                }
            })
            .collect()
    }
}

impl<V, T> Handler<PaxosMsg<V>, PaxosReply<V>> for Paxos<V, T>
where
    V: AppCommand,
    T: Transport<PaxosMsg<V>, PaxosReply<V>> + 'static,
{
    fn handle(&self, msg: PaxosMsg<V>) -> Option<PaxosReply<V>> {
        if self.is_dead() {
            return None;
        }
        let (sender, _) = msg.sender();
        trace!("Peer {} got {} for [{}] from {}", self.me, kind(&msg), msg.seq(), sender);
        Some(self.handle_paxos_message(msg))
    }
}

fn kind<V: std::fmt::Debug>(msg: &PaxosMsg<V>) -> &'static str {
    match msg {
        PaxosMsg::Prepare(_) => "Prepare",
        PaxosMsg::Accept(_) => "Accept",
        PaxosMsg::Decide(_) => "Decide",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::instance::State;

    type Peer = Arc<Paxos<String, crate::LocalPaxosEndpoint<String>>>;

    fn group(size: usize) -> (crate::local_network::LocalNetwork<PaxosMsg<String>, PaxosReply<String>>, Vec<Peer>) {
        crate::start_replicas(size, Config::default())
    }

    fn wait_decided(peer: &Peer, seq: u64) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Status::Decided(value) = peer.status(seq) {
                return Some(value);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn single_peer_decides_alone() {
        let (_net, peers) = group(1);
        peers[0].start(0, "hello".to_string());
        assert_eq!(wait_decided(&peers[0], 0), Some("hello".to_string()));
        assert_eq!(peers[0].max(), Some(0));
    }

    #[test]
    fn fresh_peer_reports_nothing() {
        let (_net, peers) = group(3);
        assert_eq!(peers[1].status(0).state(), State::Pending);
        assert_eq!(peers[1].max(), None);
        assert_eq!(peers[1].min(), 0);
        assert_eq!(peers[1].majority(), 2);
    }

    #[test]
    fn dead_peer_ignores_requests() {
        let (_net, peers) = group(3);
        peers[2].kill();
        assert!(peers[2].is_dead());
        let prepare = PaxosMsg::Prepare(crate::protocol::PrepareRequest {
            seq: 0,
            proposal: crate::protocol::ProposalNumber(3),
            sender: 0,
            sender_done: None,
        });
        assert_eq!(peers[2].handle(prepare), None);

        peers[2].start(0, "x".to_string());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(peers[0].max(), None);
    }

    #[test]
    fn peer_outside_the_group_stays_passive() {
        let (net, peers) = group(3);
        let stray: Peer = Paxos::new(3, net.endpoint(3), Config::default());
        stray.done(1);
        stray.set_unreliable();
        stray.start(0, "stray".to_string());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(stray.local_done(), None);
        assert_eq!(stray.min(), 0);
        assert_eq!(stray.max(), None);
        assert!(peers.iter().all(|p| p.max().is_none()));
    }

    #[test]
    fn local_calls_bypass_the_network() {
        let (net, peers) = group(1);
        net.sever(0, 0);
        peers[0].start(4, "self".to_string());
        assert_eq!(wait_decided(&peers[0], 4), Some("self".to_string()));
    }
}
