// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Proposer role: drives one instance through Prepare, Accept and Decide
//! until it is decided locally or forgotten.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{thread_rng, Rng};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, trace_span, warn};

use crate::instance::Status;
use crate::network::Transport;
use crate::paxos::Paxos;
use crate::protocol::*;
use crate::AppCommand;

/// Why a round ended without a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Setback {
    NoPromiseQuorum,
    NoAcceptQuorum,
    Preempted,
}

/// Everything one negotiation needs, fixed when it is started.
pub(crate) struct Proposer<V: AppCommand, T> {
    px: Arc<Paxos<V, T>>,
    seq: u64,
    value: V,
}

impl<V, T> Proposer<V, T>
where
    V: AppCommand,
    T: Transport<PaxosMsg<V>, PaxosReply<V>> + 'static,
{
    pub(crate) fn new(px: Arc<Paxos<V, T>>, seq: u64, value: V) -> Self {
        Self { px, seq, value }
    }

    /// Runs rounds with ever higher proposal numbers until the instance is
    /// decided, forgotten or the peer dies.
    pub(crate) fn run(self) {
        let tracing_span = trace_span!("Proposer", me = self.px.me(), seq = self.seq);
        let _guard = tracing_span.enter();

        let mut highest_seen = ProposalNumber::default();
        while !self.px.is_dead() {
            match self.px.status(self.seq) {
                Status::Decided(_) => return,
                Status::Forgotten => {
                    debug!("Instance already forgotten, giving up");
                    return;
                }
                Status::Pending => {}
            }

            let proposal = highest_seen.next_for(self.px.me(), self.px.peers());
            highest_seen = proposal;
            match self.round(proposal, &mut highest_seen) {
                Ok(()) => trace!("Round {:?} reached a decision", proposal),
                Err(setback) => {
                    debug!("Round {:?} failed: {:?}", proposal, setback);
                    self.pause();
                }
            }
        }
    }

    fn round(&self, proposal: ProposalNumber, highest_seen: &mut ProposalNumber) -> Result<(), Setback> {
        let value = self.prepare(proposal, highest_seen)?;
        self.accept(proposal, &value, highest_seen)?;
        self.decide(proposal, value);
        Ok(())
    }

    /// Phase 1. Returns the value this round must propose: the one accepted
    /// under the highest number reported by any promising acceptor, or our
    /// own if none was.
    fn prepare(&self, proposal: ProposalNumber, highest_seen: &mut ProposalNumber) -> Result<V, Setback> {
        let msg = PaxosMsg::Prepare(PrepareRequest {
            seq: self.seq,
            proposal,
            sender: self.px.me(),
            sender_done: self.px.local_done(),
        });

        let mut promises = 0;
        let mut highest_accepted: Option<(ProposalNumber, V)> = None;
        for reply in self.px.broadcast(&msg) {
            let reply = match reply {
                PaxosReply::Prepare(reply) => reply,
                other => {
                    warn!("Unexpected reply to Prepare: {:?}", other);
                    continue;
                }
            };
            *highest_seen = (*highest_seen).max(reply.proposal);
            if !reply.ack {
                continue;
            }
            promises += 1;
            if let Some((number, value)) = reply.accepted {
                *highest_seen = (*highest_seen).max(number);
                let higher = highest_accepted.as_ref().map_or(true, |(best, _)| number > *best);
                if higher {
                    highest_accepted = Some((number, value));
                }
            }
        }

        if promises < self.px.majority() {
            return Err(Setback::NoPromiseQuorum);
        }
        debug!("Got {}/{} promises for {:?}", promises, self.px.peers(), proposal);
        Ok(highest_accepted.map_or_else(|| self.value.clone(), |(_, value)| value))
    }

    /// Phase 2. Fails if a majority did not accept or anyone promised a
    /// higher number in the meantime.
    fn accept(&self, proposal: ProposalNumber, value: &V, highest_seen: &mut ProposalNumber) -> Result<(), Setback> {
        let msg = PaxosMsg::Accept(AcceptRequest {
            seq: self.seq,
            proposal,
            value: value.clone(),
            sender: self.px.me(),
            sender_done: self.px.local_done(),
        });

        let mut accepts = 0;
        let mut preempted = false;
        for reply in self.px.broadcast(&msg) {
            let reply = match reply {
                PaxosReply::Accept(reply) => reply,
                other => {
                    warn!("Unexpected reply to Accept: {:?}", other);
                    continue;
                }
            };
            *highest_seen = (*highest_seen).max(reply.proposal);
            if reply.ack {
                accepts += 1;
            } else if reply.proposal > proposal {
                preempted = true;
            }
        }

        if accepts < self.px.majority() {
            return Err(Setback::NoAcceptQuorum);
        }
        if preempted {
            return Err(Setback::Preempted);
        }
        Ok(())
    }

    /// Phase 3. Best effort, peers that miss it learn the value later.
    fn decide(&self, proposal: ProposalNumber, value: V) {
        info!("Value was chosen: [{}] {:?}, {:?}", self.seq, proposal, value);
        let msg = PaxosMsg::Decide(DecideRequest {
            seq: self.seq,
            proposal,
            value,
            sender: self.px.me(),
            sender_done: self.px.local_done(),
        });
        let acks = self.px.broadcast(&msg).len();
        trace!("Decide reached {}/{} peers", acks, self.px.peers());
    }

    /// Random pause after a lost round, so duelling proposers drift apart.
    fn pause(&self) {
        let max = self.px.config().round_backoff.as_millis() as u64;
        if max > 0 {
            let millis = thread_rng().gen_range(0, max + 1);
            thread::sleep(Duration::from_millis(millis));
        }
    }
}
