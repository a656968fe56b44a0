// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

use rand::{thread_rng, Rng};
use tracing::{debug, trace};

use super::{Op, OpRequest, OpResponse};
use crate::error::{Error, Result};
use crate::network::Transport;

/// Client of the key-value service. Tries every server in turn until one
/// commits the operation.
pub struct Clerk<T> {
    transport: T,
    client_id: u64,
    op_seq: u64,
}

impl<T: Transport<OpRequest, OpResponse>> Clerk<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            client_id: thread_rng().gen(),
            op_seq: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.client_id
    }

    /// Current value of `key`, `None` if it was never put.
    pub fn get(&mut self, key: &str) -> Result<Option<i64>> {
        let op = Op::get(self.client_id, self.next_op_seq(), key);
        self.call(op)
    }

    pub fn put(&mut self, key: &str, value: i64) -> Result<()> {
        let op = Op::put(self.client_id, self.next_op_seq(), key, value);
        self.call(op).map(|_| ())
    }

    /// Sends an already built operation again, as a retrying client would.
    pub fn resend(&self, op: Op) -> Result<Option<i64>> {
        self.call(op)
    }

    fn next_op_seq(&mut self) -> u64 {
        let op_seq = self.op_seq;
        self.op_seq += 1;
        op_seq
    }

    fn call(&self, op: Op) -> Result<Option<i64>> {
        let req = OpRequest { op };
        for server in 0..self.transport.size() {
            match self.transport.call(server, &req) {
                Some(resp) if resp.success => {
                    trace!("Server {} committed {:?}", server, req.op);
                    return Ok(resp.value);
                }
                Some(_) => debug!("Server {} failed {:?}", server, req.op),
                None => debug!("Server {} unreachable", server),
            }
        }
        Err(Error::Unavailable)
    }
}
