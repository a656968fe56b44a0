// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Replicated key-value store on top of the Paxos log.
//!
//! Clients tag every operation with their ID and a per-client sequence
//! number. Servers commit operations through a [`Replica`] and recognize
//! their own operation among the decided ones by full equality.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Backoff, Config};
use crate::local_network::{LocalEndpoint, LocalNetwork};
use crate::protocol::{PaxosMsg, PaxosReply};
use crate::replica::{Replica, ReplicatedStateMachine};
use crate::{start_replicas, LocalPaxosEndpoint};

pub use client::Clerk;
pub use server::KvServer;

mod client;
mod server;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Get,
    Put,
}

/// A client operation, the value the servers agree on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Op {
    pub kind: OpKind,
    pub client_id: u64,
    /// Increases with every operation a client issues.
    pub op_seq: u64,
    pub key: String,
    /// Only set for `Put`.
    pub value: Option<i64>,
}

impl Op {
    pub fn get(client_id: u64, op_seq: u64, key: &str) -> Self {
        Self {
            kind: OpKind::Get,
            client_id,
            op_seq,
            key: key.to_string(),
            value: None,
        }
    }

    pub fn put(client_id: u64, op_seq: u64, key: &str, value: i64) -> Self {
        Self {
            kind: OpKind::Put,
            client_id,
            op_seq,
            key: key.to_string(),
            value: Some(value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRequest {
    pub op: Op,
}

/// `value` is the key's value for a successful `Get` and `None` otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResponse {
    pub success: bool,
    pub value: Option<i64>,
}

impl OpResponse {
    pub fn failure() -> Self {
        Self {
            success: false,
            value: None,
        }
    }
}

/// The map every server builds from the decided operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValueStore {
    store: HashMap<String, i64>,
}

impl KeyValueStore {
    pub fn get(&self, key: &str) -> Option<i64> {
        self.store.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl ReplicatedStateMachine for KeyValueStore {
    type Command = Op;
    type Output = Option<i64>;

    /// Returns the key's value once the operation is applied.
    fn execute(&mut self, op: &Op) -> Option<i64> {
        if let (OpKind::Put, Some(value)) = (op.kind, op.value) {
            self.store.insert(op.key.clone(), value);
        }
        self.get(&op.key)
    }
}

pub type KvReplica<T> = Replica<KeyValueStore, T>;

/// Network carrying client operations to the servers.
pub type LocalKvNetwork = LocalNetwork<OpRequest, OpResponse>;

/// A group of key-value servers wired together in process.
pub struct LocalCluster {
    pub paxos_net: LocalNetwork<PaxosMsg<Op>, PaxosReply<Op>>,
    pub kv_net: LocalKvNetwork,
    pub servers: Vec<Arc<KvServer<LocalPaxosEndpoint<Op>>>>,
}

impl LocalCluster {
    pub fn start(size: usize, config: Config, backoff: Backoff) -> Self {
        let (paxos_net, peers) = start_replicas::<Op>(size, config);
        let kv_net = LocalNetwork::new(size);
        let servers: Vec<_> = peers
            .into_iter()
            .map(|px| KvServer::new(px, backoff))
            .collect();
        for (me, server) in servers.iter().enumerate() {
            kv_net.register(me, server);
        }
        Self {
            paxos_net,
            kv_net,
            servers,
        }
    }

    /// A new client with its own identity.
    pub fn clerk(&self) -> Clerk<LocalEndpoint<OpRequest, OpResponse>> {
        Clerk::new(self.kv_net.client())
    }
}
