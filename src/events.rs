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

//! Append-only log of what happened to every read.
//!
//! Worker threads finish reads in any order, the [EventLogger] puts them
//! back in input order before writing. Only the outcome is stored, as one
//! zig-zag varint per read; the input index is implicit in the position.
//!
//! | outcome        | stored value    |
//! |----------------|-----------------|
//! | Assigned(c)    | c               |
//! | Dropped        | -1              |
//! | Deferred       | -2              |
//! | Mapped(c)      | -3 - c          |
//!
//! A finished log can be read back any number of times with
//! [EventLog::reader].

use crate::alignment::PreClone;
use crate::error::Error;
use crate::error::Result;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

use bincode::decode_from_std_read;
use bincode::encode_into_std_write;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tempfile::TempPath;

/// Number of out of order events the logger holds before giving up.
pub const REORDER_BUFFER_SIZE: usize = 30_000;

/// Outcome of one read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    /// Read was accumulated as a core read of the clone.
    Assigned(i64),
    Dropped,
    /// Read is left for the deferred mapping pass.
    Deferred,
    /// Low quality read mapped onto the clone.
    Mapped(i64),
}

impl EventKind {
    fn to_raw(self) -> i64 {
        match self {
            EventKind::Assigned(clone) => clone,
            EventKind::Dropped => -1,
            EventKind::Deferred => -2,
            EventKind::Mapped(clone) => -3 - clone,
        }
    }

    fn from_raw(raw: i64) -> Self {
        match raw {
            x if x >= 0 => EventKind::Assigned(x),
            -1 => EventKind::Dropped,
            -2 => EventKind::Deferred,
            x => EventKind::Mapped(-3 - x),
        }
    }

    /// Clone the read ended up in, if any.
    pub fn clone_index(&self) -> Option<i64> {
        match *self {
            EventKind::Assigned(clone) | EventKind::Mapped(clone) => Some(clone),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AssemblerEvent {
    /// Sequential index of the read, or of the deferred read in the deferred log.
    pub index: u64,
    pub kind: EventKind,
}

impl AssemblerEvent {
    pub fn new(index: u64, kind: EventKind) -> Self {
        AssemblerEvent { index, kind }
    }
}

struct LoggerState {
    conn: BufWriter<File>,
    next: u64,
    pending: BTreeMap<u64, EventKind>,
}

impl LoggerState {
    fn write(&mut self, kind: EventKind) -> Result<()> {
        encode_into_std_write(kind.to_raw(), &mut self.conn, bincode::config::standard())?;
        self.next += 1;
        Ok(())
    }
}

/// Collects events from many threads and writes them in index order.
pub struct EventLogger {
    state: Mutex<LoggerState>,
    path: TempPath,
}

impl EventLogger {
    /// Logger backed by a temporary file in `temp_dir` (or the system default).
    pub fn new(temp_dir: Option<&Path>) -> Result<Self> {
        let file = match temp_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let (file, path) = file.into_parts();
        let state = LoggerState { conn: BufWriter::new(file), next: 0, pending: BTreeMap::new() };
        Ok(EventLogger { state: Mutex::new(state), path })
    }

    pub fn log(&self, event: AssemblerEvent) -> Result<()> {
        let mut state = self.state.lock();
        if event.index < state.next || state.pending.contains_key(&event.index) {
            return Err(Error::protocol(format!("event for read {} logged twice", event.index)));
        }
        if event.index != state.next {
            state.pending.insert(event.index, event.kind);
            if state.pending.len() > REORDER_BUFFER_SIZE {
                return Err(Error::MissingEvent { expected: state.next, buffered: state.pending.len() });
            }
            return Ok(());
        }
        state.write(event.kind)?;
        loop {
            let next = state.next;
            match state.pending.remove(&next) {
                Some(kind) => state.write(kind)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Closes the log, checking that exactly `expected` events were written.
    pub fn end(self, expected: u64) -> Result<EventLog> {
        let mut state = self.state.into_inner();
        if !state.pending.is_empty() {
            return Err(Error::MissingEvent { expected: state.next, buffered: state.pending.len() });
        }
        if state.next != expected {
            return Err(Error::EventCount { expected, written: state.next });
        }
        state.conn.flush()?;
        Ok(EventLog { path: self.path, count: state.next })
    }
}

/// A finished event log. The backing file is removed on drop.
pub struct EventLog {
    path: TempPath,
    count: u64,
}

impl EventLog {
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn reader(&self) -> Result<EventReader> {
        let conn = BufReader::new(File::open(&self.path)?);
        Ok(EventReader { conn, next: 0, count: self.count })
    }
}

/// Replays an [EventLog] in index order.
pub struct EventReader {
    conn: BufReader<File>,
    next: u64,
    count: u64,
}

impl Iterator for EventReader {
    type Item = Result<AssemblerEvent>;

    fn next(&mut self) -> Option<Result<AssemblerEvent>> {
        if self.next == self.count {
            return None
        }
        let raw: std::result::Result<i64, bincode::error::DecodeError> = decode_from_std_read(&mut self.conn, bincode::config::standard());
        match raw {
            Ok(raw) => {
                let event = AssemblerEvent::new(self.next, EventKind::from_raw(raw));
                self.next += 1;
                Some(Ok(event))
            },
            Err(e) => {
                self.next = self.count;
                Some(Err(e.into()))
            },
        }
    }
}

/// Picks the deferred reads out of a fresh pass over the input.
///
/// Yields `(deferred ordinal, read)` for every read the initial log marks as
/// deferred. The input must produce the reads in the same order as the
/// initial pass saw them.
pub struct DeferredFilter<I> {
    input: I,
    events: EventReader,
    ordinal: u64,
}

impl<I: Iterator<Item = Result<PreClone>>> DeferredFilter<I> {
    pub fn new(input: I, events: EventReader) -> Self {
        DeferredFilter { input, events, ordinal: 0 }
    }

    fn next_deferred(&mut self) -> Result<Option<(u64, PreClone)>> {
        for read in self.input.by_ref() {
            let read = read?;
            let event = match self.events.next() {
                Some(event) => event?,
                None => return Err(Error::corrupted(format!("no event for read {}", read.index))),
            };
            if event.index != read.index {
                return Err(Error::corrupted(format!("event {} does not match read {}", event.index, read.index)));
            }
            if event.kind == EventKind::Deferred {
                let ordinal = self.ordinal;
                self.ordinal += 1;
                return Ok(Some((ordinal, read)));
            }
        }
        Ok(None)
    }
}

impl<I: Iterator<Item = Result<PreClone>>> Iterator for DeferredFilter<I> {
    type Item = Result<(u64, PreClone)>;

    fn next(&mut self) -> Option<Result<(u64, PreClone)>> {
        self.next_deferred().transpose()
    }
}
