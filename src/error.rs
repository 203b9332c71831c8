// clna: Clonotype assembly and indexed clone storage.
//
// Copyright 2025 The clna authors.
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//

//! Error type shared by the assembler and the file formats.
//!
//! Everything that goes wrong in clna is fatal for the enclosing phase:
//! there are no retries. Reads that are dropped during assembly are not
//! errors, they are reported through
//! [AssemblerListener](crate::assembler::AssemblerListener).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Config(#[from] toml::de::Error),

    /// Magic bytes, checksums or index sizes do not match.
    #[error("corrupted file: {0}")]
    Corrupted(String),

    /// An operation was called in a state that does not allow it.
    #[error("illegal state: {0}")]
    Protocol(String),

    /// The reorder buffer of an event log overflowed, some input index was never logged.
    #[error("missing event for alignment {expected}: {buffered} later events are waiting")]
    MissingEvent { expected: u64, buffered: usize },

    #[error("event log closed with {written} events, expected {expected}")]
    EventCount { expected: u64, written: u64 },

    #[error("invalid read to clone mapping: clone {clone_index} with flags {flags:#04x}")]
    InvalidMapping { clone_index: i64, flags: u8 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupted<S: Into<String>>(message: S) -> Self {
        Error::Corrupted(message.into())
    }

    pub(crate) fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }
}
