// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Turns Paxos instances into a replicated log applied to a state machine.
//!
//! A replica proposes each command at the next slot it has not applied yet.
//! Whatever wins that slot is applied, whether it is the command being
//! submitted or another replica's, and the replica moves on to the next
//! slot until its own command is the one decided. Slots are applied in
//! increasing order without gaps, so all replicas apply the same sequence.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
#[allow(unused_imports)]
use tracing::{debug, info, info_span, trace, warn};

use crate::config::Backoff;
use crate::error::{Error, Result};
use crate::instance::Status;
use crate::network::Transport;
use crate::paxos::Paxos;
use crate::protocol::{PaxosMsg, PaxosReply};
use crate::AppCommand;

/// Application state driven by the agreed log.
pub trait ReplicatedStateMachine: Send + 'static {
    type Command: AppCommand;
    type Output;

    /// Applies one decided command. Called exactly once per log slot, in
    /// slot order.
    fn execute(&mut self, command: &Self::Command) -> Self::Output;
}

struct Log<S: ReplicatedStateMachine> {
    /// First slot not applied yet.
    next_seq: u64,
    machine: S,
    applied: Vec<S::Command>,
}

/// A state machine replicated through one Paxos peer.
pub struct Replica<S: ReplicatedStateMachine, T> {
    px: Arc<Paxos<S::Command, T>>,
    backoff: Backoff,
    /// Held for a whole submission, so only one drive loop runs at a time.
    submitting: Mutex<()>,
    /// Held only to read or advance the log, never while waiting.
    log: Mutex<Log<S>>,
}

impl<S, T> Replica<S, T>
where
    S: ReplicatedStateMachine,
    T: Transport<PaxosMsg<S::Command>, PaxosReply<S::Command>> + 'static,
{
    pub fn new(px: Arc<Paxos<S::Command, T>>, machine: S, backoff: Backoff) -> Self {
        Self {
            px,
            backoff,
            submitting: Mutex::new(()),
            log: Mutex::new(Log {
                next_seq: 0,
                machine,
                applied: Vec::new(),
            }),
        }
    }

    pub fn paxos(&self) -> &Arc<Paxos<S::Command, T>> {
        &self.px
    }

    /// Commits `command` to the log and returns the result of applying it.
    ///
    /// Submissions on one replica are serialized, but readers of the log
    /// are never blocked by a submission waiting for a decision. If a slot
    /// is not decided within the backoff schedule the submission fails and
    /// the slot is retried by the next one.
    pub fn submit(&self, command: S::Command) -> Result<S::Output> {
        let tracing_span = info_span!("Replica", id = self.px.me());
        let _guard = tracing_span.enter();

        let _submitting = self.submitting.lock();
        loop {
            if self.px.is_dead() {
                return Err(Error::Dead);
            }
            let seq = self.next_seq();
            trace!("Proposing {:?} at [{}]", command, seq);
            self.px.start(seq, command.clone());
            let decided = self.wait_decided(seq)?;

            let output = {
                let mut log = self.log.lock();
                let output = log.machine.execute(&decided);
                log.applied.push(decided.clone());
                log.next_seq += 1;
                output
            };
            self.px.done(seq);

            if decided == command {
                debug!("Committed {:?} at [{}]", command, seq);
                return Ok(output);
            }
            debug!("Slot [{}] went to {:?}, retrying at the next one", seq, decided);
        }
    }

    /// Polls the local peer with bounded exponential backoff until `seq` is
    /// decided.
    fn wait_decided(&self, seq: u64) -> Result<S::Command> {
        for interval in self.backoff.intervals() {
            match self.px.status(seq) {
                Status::Decided(command) => return Ok(command),
                Status::Forgotten => {
                    warn!("Slot [{}] was forgotten before being applied", seq);
                    return Err(Error::Forgotten { seq });
                }
                Status::Pending => thread::sleep(interval),
            }
        }
        match self.px.status(seq) {
            Status::Decided(command) => Ok(command),
            _ => {
                warn!("Slot [{}] not decided in time", seq);
                Err(Error::Timeout { seq })
            }
        }
    }

    /// First slot this replica has not applied yet.
    pub fn next_seq(&self) -> u64 {
        self.log.lock().next_seq
    }

    /// Every command applied so far, in slot order starting at slot 0.
    pub fn applied_log(&self) -> Vec<S::Command> {
        self.log.lock().applied.clone()
    }

    /// Runs `f` on the current state of the machine.
    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.log.lock().machine)
    }
}
