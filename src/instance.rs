// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Per-peer bookkeeping of agreement instances and done watermarks.
//!
//! The store is a plain data structure; [`crate::Paxos`] owns it behind a
//! single mutex and every read or write of an instance goes through it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::ProposalNumber;

/// Lifecycle of a single instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Pending,
    Decided,
    Forgotten,
}

/// What the local peer knows about an instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status<V> {
    Pending,
    Decided(V),
    Forgotten,
}

impl<V> Status<V> {
    pub fn state(&self) -> State {
        match self {
            Status::Pending => State::Pending,
            Status::Decided(_) => State::Decided,
            Status::Forgotten => State::Forgotten,
        }
    }

    pub fn decided(self) -> Option<V> {
        match self {
            Status::Decided(value) => Some(value),
            _ => None,
        }
    }
}

/// Acceptor state for one sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance<V> {
    /// Highest proposal number this acceptor promised to honor.
    pub min_proposal: ProposalNumber,
    pub accepted_proposal: Option<ProposalNumber>,
    pub value: Option<V>,
    pub state: State,
}

impl<V> Instance<V> {
    pub fn new() -> Self {
        Self {
            min_proposal: ProposalNumber::default(),
            accepted_proposal: None,
            value: None,
            state: State::Pending,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.state == State::Decided
    }
}

impl<V> Default for Instance<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Instance table plus the done-array of every peer in the group.
#[derive(Debug)]
pub struct InstanceStore<V> {
    me: usize,
    pub(crate) instances: HashMap<u64, Instance<V>>,
    /// `highest_done[i]` is the highest sequence peer `i` declared done.
    highest_done: Vec<Option<u64>>,
}

impl<V: Clone> InstanceStore<V> {
    pub fn new(me: usize, peers: usize) -> Self {
        Self {
            me,
            instances: HashMap::new(),
            highest_done: vec![None; peers],
        }
    }

    /// Returns the instance for `seq`, creating an empty one if needed.
    pub fn instance_mut(&mut self, seq: u64) -> &mut Instance<V> {
        self.instances.entry(seq).or_insert_with(Instance::new)
    }

    pub fn get(&self, seq: u64) -> Option<&Instance<V>> {
        self.instances.get(&seq)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The done watermark this peer piggybacks on its own requests.
    pub fn local_done(&self) -> Option<u64> {
        self.highest_done.get(self.me).copied().flatten()
    }

    /// Records a watermark learned from `peer`. Watermarks never move back,
    /// even when requests arrive out of order.
    pub fn observe_done(&mut self, peer: usize, done: Option<u64>) {
        if let Some(slot) = self.highest_done.get_mut(peer) {
            if done > *slot {
                *slot = done;
            }
        }
    }

    /// The local application no longer needs instances `<= seq`.
    pub fn done(&mut self, seq: u64) {
        let me = self.me;
        self.observe_done(me, Some(seq));
    }

    /// One more than the lowest watermark across all peers, or 0 while any
    /// peer has not declared anything done.
    pub fn min_watermark(&self) -> u64 {
        self.highest_done
            .iter()
            .map(|done| done.map_or(0, |seq| seq + 1))
            .min()
            .unwrap_or(0)
    }

    /// Computes `Min()` and reclaims every instance below it.
    pub fn min(&mut self) -> u64 {
        let min = self.min_watermark();
        let before = self.instances.len();
        self.instances.retain(|&seq, _| seq >= min);
        let forgotten = before - self.instances.len();
        if forgotten > 0 {
            debug!("Forgot {} instances below {}", forgotten, min);
        }
        min
    }

    /// Highest sequence number with a recorded instance.
    pub fn max(&self) -> Option<u64> {
        self.instances.keys().copied().max()
    }

    pub fn status(&mut self, seq: u64) -> Status<V> {
        if seq < self.min() {
            return Status::Forgotten;
        }
        match self.instances.get(&seq) {
            Some(instance) if instance.is_decided() => match &instance.value {
                Some(value) => Status::Decided(value.clone()),
                None => Status::Pending,
            },
            _ => Status::Pending,
        }
    }
}
