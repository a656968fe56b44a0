// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::{KeyValueStore, KvReplica, Op, OpKind, OpRequest, OpResponse};
use crate::config::Backoff;
use crate::error::Result;
use crate::network::{Handler, Transport};
use crate::paxos::Paxos;
use crate::protocol::{PaxosMsg, PaxosReply};
use crate::replica::Replica;

/// Key-value server backed by one Paxos peer.
pub struct KvServer<T> {
    me: usize,
    replica: KvReplica<T>,
    dead: AtomicBool,
}

impl<T> KvServer<T>
where
    T: Transport<PaxosMsg<Op>, PaxosReply<Op>> + 'static,
{
    pub fn new(px: Arc<Paxos<Op, T>>, backoff: Backoff) -> Arc<Self> {
        Arc::new(Self {
            me: px.me(),
            replica: Replica::new(px, KeyValueStore::default(), backoff),
            dead: AtomicBool::new(false),
        })
    }

    pub fn me(&self) -> usize {
        self.me
    }

    pub fn paxos(&self) -> &Arc<Paxos<Op, T>> {
        self.replica.paxos()
    }

    /// Commits a `Get` and returns the key's value at its place in the log.
    pub fn get(&self, op: Op) -> Result<Option<i64>> {
        self.replica.submit(op)
    }

    /// Commits a `Put`.
    pub fn put(&self, op: Op) -> Result<()> {
        self.replica.submit(op).map(|_| ())
    }

    /// Value of `key` in this server's map, without going through the log.
    pub fn local_value(&self, key: &str) -> Option<i64> {
        self.replica.inspect(|kv| kv.get(key))
    }

    /// Operations applied so far, in log order.
    pub fn applied_log(&self) -> Vec<Op> {
        self.replica.applied_log()
    }

    pub fn next_seq(&self) -> u64 {
        self.replica.next_seq()
    }

    /// Shuts down the server together with its Paxos peer.
    pub fn kill(&self) {
        info!("Server {} killed", self.me);
        self.dead.store(true, Ordering::SeqCst);
        self.paxos().kill();
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

impl<T> Handler<OpRequest, OpResponse> for KvServer<T>
where
    T: Transport<PaxosMsg<Op>, PaxosReply<Op>> + 'static,
{
    fn handle(&self, req: OpRequest) -> Option<OpResponse> {
        if self.is_dead() {
            return None;
        }
        let op = req.op;
        let result = match op.kind {
            OpKind::Get => self.get(op.clone()),
            OpKind::Put => self.put(op.clone()).map(|_| None),
        };
        Some(match result {
            Ok(value) => OpResponse {
                success: true,
                value,
            },
            Err(e) => {
                warn!("Server {} failed {:?}: {}", self.me, op, e);
                OpResponse::failure()
            }
        })
    }
}
