// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Multi-instance Paxos and a replicated key-value store built on top of it.
//!
//! Every peer may propose for any instance at any time; each instance
//! independently settles on exactly one value. [`Replica`] turns the
//! instances into a totally ordered log and applies it to a
//! [`ReplicatedStateMachine`], and [`kvpaxos`] is such a state machine
//! holding a key-value map.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

pub use config::{Backoff, Config, NetworkConfig};
pub use error::{Error, Result};
pub use instance::{State, Status};
pub use local_network::{LocalEndpoint, LocalNetwork};
pub use network::{Handler, Transport};
pub use paxos::Paxos;
pub use protocol::{PaxosMsg, PaxosReply, ProposalNumber};
pub use replica::{Replica, ReplicatedStateMachine};
pub use udp_network::UdpNetworkNode;

mod acceptor;
pub mod config;
pub mod error;
pub mod instance;
pub mod kvpaxos;
pub mod local_network;
pub mod network;
pub mod paxos;
mod proposer;
pub mod protocol;
pub mod replica;
pub mod udp_network;

/// A value the Paxos peers can agree on.
pub trait AppCommand: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> AppCommand for T where T: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Transport used between the peers of an in-process group.
pub type LocalPaxosEndpoint<V> = LocalEndpoint<PaxosMsg<V>, PaxosReply<V>>;

/// Starts a group of `group_size` peers connected through an in-process
/// network and returns the network together with the peers.
pub fn start_replicas<V: AppCommand>(
    group_size: usize,
    config: Config,
) -> (LocalNetwork<PaxosMsg<V>, PaxosReply<V>>, Vec<Arc<Paxos<V, LocalPaxosEndpoint<V>>>>) {
    let net = LocalNetwork::new(group_size);
    let peers: Vec<_> = (0..group_size)
        .map(|me| Paxos::new(me, net.endpoint(me), config))
        .collect();
    for (me, peer) in peers.iter().enumerate() {
        net.register(me, peer);
    }
    (net, peers)
}
