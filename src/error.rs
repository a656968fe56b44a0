// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Errors surfaced by the replicated state machine and its transports.
//!
//! The Paxos protocol itself never fails: lost messages show up as missing
//! responses and lost rounds are retried. Only the layers above it report
//! errors to their callers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("instance {seq} was not decided in time")]
    Timeout { seq: u64 },

    #[error("instance {seq} was forgotten before it could be applied")]
    Forgotten { seq: u64 },

    #[error("peer has been killed")]
    Dead,

    #[error("no server committed the operation")]
    Unavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
