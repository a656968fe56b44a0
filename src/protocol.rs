// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Contains the network-message-types for the Paxos consensus protocol.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Totally ordered ballot used to rank competing proposals.
///
/// Every number a peer generates is congruent to the peer's index modulo the
/// group size, so two peers never produce the same number.
/// The default value is below any number a proposer will ever generate.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalNumber(pub u64);

impl ProposalNumber {
    /// Returns the smallest number reserved for peer `me` of a group of
    /// `peers` that is strictly greater than `self`.
    pub fn next_for(self, me: usize, peers: usize) -> Self {
        let peers = peers as u64;
        let round = (self.0 + 1 + peers) / peers;
        ProposalNumber(round * peers + me as u64)
    }
}

/// Phase 1a.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub seq: u64,
    pub proposal: ProposalNumber,
    pub sender: usize,
    pub sender_done: Option<u64>,
}

/// Phase 1b. `proposal` is the number promised on an ack and the number
/// already promised on a rejection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrepareResponse<V> {
    pub ack: bool,
    pub proposal: ProposalNumber,
    pub accepted: Option<(ProposalNumber, V)>,
}

/// Phase 2a.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptRequest<V> {
    pub seq: u64,
    pub proposal: ProposalNumber,
    pub value: V,
    pub sender: usize,
    pub sender_done: Option<u64>,
}

/// Phase 2b.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptResponse<V> {
    pub ack: bool,
    pub proposal: ProposalNumber,
    pub accepted: Option<(ProposalNumber, V)>,
}

/// Tells a peer which value was chosen for `seq`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecideRequest<V> {
    pub seq: u64,
    pub proposal: ProposalNumber,
    pub value: V,
    pub sender: usize,
    pub sender_done: Option<u64>,
}

/// Advisory only, nobody counts these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecideResponse {
    pub ack: bool,
}

/// Requests exchanged between Paxos peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PaxosMsg<V: Debug> {
    Prepare(PrepareRequest),
    Accept(AcceptRequest<V>),
    Decide(DecideRequest<V>),
}

/// Responses to [`PaxosMsg`], one variant per request kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PaxosReply<V: Debug> {
    Prepare(PrepareResponse<V>),
    Accept(AcceptResponse<V>),
    Decide(DecideResponse),
}

impl<V: Debug> PaxosMsg<V> {
    pub fn seq(&self) -> u64 {
        match self {
            PaxosMsg::Prepare(req) => req.seq,
            PaxosMsg::Accept(req) => req.seq,
            PaxosMsg::Decide(req) => req.seq,
        }
    }

    /// The peer that sent this request and the done watermark it piggybacks.
    pub fn sender(&self) -> (usize, Option<u64>) {
        match self {
            PaxosMsg::Prepare(req) => (req.sender, req.sender_done),
            PaxosMsg::Accept(req) => (req.sender, req.sender_done),
            PaxosMsg::Decide(req) => (req.sender, req.sender_done),
        }
    }
}
