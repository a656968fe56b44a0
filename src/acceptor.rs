// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Acceptor role: answers Prepare, Accept and Decide against the local
//! [`InstanceStore`]. Callers hold the peer's lock for the whole handler.

use std::fmt::Debug;

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::instance::{InstanceStore, State};
use crate::protocol::*;

impl<V: Clone + Debug + PartialEq> InstanceStore<V> {
    /// Responds to a Paxos Prepare (1a) message.
    /// Promises iff no equal or higher number was promised for `seq` before.
    pub fn prepare(&mut self, req: PrepareRequest) -> PrepareResponse<V> {
        self.observe_done(req.sender, req.sender_done);
        let min = self.min_watermark();
        if req.seq < min {
            debug!("Prepare rejected: [{}] already forgotten (min {})", req.seq, min);
            return PrepareResponse {
                ack: false,
                proposal: req.proposal,
                accepted: None,
            };
        }

        let instance = self.instance_mut(req.seq);
        if req.proposal > instance.min_proposal {
            trace!("Promise: [{}] {:?}", req.seq, req.proposal);
            instance.min_proposal = req.proposal;
            let accepted = match (instance.accepted_proposal, &instance.value) {
                (Some(n), Some(value)) => Some((n, value.clone())),
                _ => None,
            };
            PrepareResponse {
                ack: true,
                proposal: req.proposal,
                accepted,
            }
        } else {
            debug!(
                "Prepare rejected: [{}] {:?}<={:?}",
                req.seq, req.proposal, instance.min_proposal
            );
            PrepareResponse {
                ack: false,
                proposal: instance.min_proposal,
                accepted: None,
            }
        }
    }

    /// Responds to a Paxos Accept (2a) message.
    pub fn accept(&mut self, req: AcceptRequest<V>) -> AcceptResponse<V> {
        self.observe_done(req.sender, req.sender_done);
        let min = self.min_watermark();
        if req.seq < min {
            debug!("Accept rejected: [{}] already forgotten (min {})", req.seq, min);
            return AcceptResponse {
                ack: false,
                proposal: req.proposal,
                accepted: None,
            };
        }

        let instance = self.instance_mut(req.seq);
        if req.proposal < instance.min_proposal {
            debug!(
                "Accept rejected: [{}] {:?}<{:?}",
                req.seq, req.proposal, instance.min_proposal
            );
            return AcceptResponse {
                ack: false,
                proposal: instance.min_proposal,
                accepted: None,
            };
        }

        trace!("Accepted: [{}] {:?}, {:?}", req.seq, req.proposal, req.value);
        instance.min_proposal = req.proposal;
        instance.accepted_proposal = Some(req.proposal);
        if instance.state == State::Decided {
            if instance.value.as_ref() != Some(&req.value) {
                error!("Accept for decided [{}] carries another value: {:?}", req.seq, req.value);
            }
        } else {
            instance.value = Some(req.value);
        }
        let proposal = req.proposal;
        AcceptResponse {
            ack: true,
            proposal,
            accepted: instance.value.clone().map(|value| (proposal, value)),
        }
    }

    /// Handles a Decide message. The value already won a majority of
    /// acceptors, so it is recorded whatever this acceptor promised.
    pub fn decide(&mut self, req: DecideRequest<V>) -> DecideResponse {
        self.observe_done(req.sender, req.sender_done);
        if req.seq < self.min_watermark() {
            trace!("Decide for forgotten [{}] dropped", req.seq);
            return DecideResponse { ack: true };
        }

        let instance = self.instance_mut(req.seq);
        if instance.is_decided() {
            if instance.value.as_ref() != Some(&req.value) {
                error!("Conflicting decision for [{}]: {:?}", req.seq, req.value);
            }
            return DecideResponse { ack: true };
        }

        debug!("Learned: [{}] {:?}, {:?}", req.seq, req.proposal, req.value);
        instance.value = Some(req.value);
        instance.state = State::Decided;
        DecideResponse { ack: true }
    }
}
