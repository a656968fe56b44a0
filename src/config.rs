// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Tunables for the Paxos engine, the decide wait and the fault injection
//! of the in-process network.

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

/// Settings shared by every peer of a Paxos group.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How long a remote call waits for its response before giving up.
    pub rpc_timeout: Duration,

    /// Upper bound of the random pause a proposer takes after losing a round.
    pub round_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(500),
            round_backoff: Duration::from_millis(20),
        }
    }
}

/// Bounded exponential backoff used while polling for a decision.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Backoff {
    /// Returns the sleep interval that follows `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current.checked_mul(2).map_or(self.max, |doubled| doubled.min(self.max))
    }

    /// Iterates over every interval of the schedule, in order.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut current = self.initial;
        (0..self.attempts).map(move |_| {
            let interval = current;
            current = self.next(current);
            interval
        })
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
            attempts: 40,
        }
    }
}

/// Fault injection parameters of an unreliable peer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Probability that a request to an unreliable peer is dropped unseen.
    pub drop_request: f64,

    /// Probability that the reply of an unreliable peer is lost after the
    /// request was processed.
    pub drop_reply: f64,

    /// Mean of the exponentially distributed delay added to each exchange.
    pub mean_delay: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            drop_request: 0.1,
            drop_reply: 0.2,
            mean_delay: Duration::from_millis(2),
        }
    }
}

impl NetworkConfig {
    pub fn drops_request<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen_bool(clamp_probability(self.drop_request))
    }

    pub fn drops_reply<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen_bool(clamp_probability(self.drop_reply))
    }

    /// Samples the delay of one exchange, capped at ten times the mean.
    pub fn delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let mean = self.mean_delay.as_secs_f64();
        if mean <= 0.0 {
            return Duration::from_secs(0);
        }
        match Exp::new(1.0 / mean) {
            Ok(exp) => {
                let secs: f64 = exp.sample(rng);
                Duration::from_secs_f64(secs.min(10.0 * mean))
            }
            Err(_) => Duration::from_secs(0),
        }
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.max(0.0).min(1.0)
    }
}
