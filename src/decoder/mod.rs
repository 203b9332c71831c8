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

//! Reads objects back from a block stream written by
//! [BlockEncoder](crate::encoder::BlockEncoder).
//!
//! Iteration stops at a separator or at the terminator. After a separator
//! [resume](BlockDecoder::resume) continues with the next group.

use crate::compression::unpack_block;
use crate::error::Error;
use crate::error::Result;
use crate::headers::block::Marker;
use crate::headers::block::read_marker;

use std::io::Read;
use std::marker::PhantomData;

use bincode::Decode;
use bincode::decode_from_slice;

/// Why a [BlockDecoder] stopped returning objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stop {
    Separator,
    End,
}

pub struct BlockDecoder<R: Read, T> {
    // Inputs
    conn: R,

    // Internals
    block: std::vec::IntoIter<T>,
    stop: Option<Stop>,
    failed: bool,
    _object: PhantomData<T>,
}

impl<R: Read, T: Decode<()>> BlockDecoder<R, T> {
    pub fn new(
        conn: R,
    ) -> Self {
        BlockDecoder {
            conn,
            block: Vec::new().into_iter(), stop: None, failed: false, _object: PhantomData,
        }
    }

    pub fn stop(&self) -> Option<Stop> {
        self.stop
    }

    /// Continues past a separator. Returns false at the end of the stream.
    pub fn resume(&mut self) -> bool {
        match self.stop {
            Some(Stop::End) => false,
            _ => {
                self.stop = None;
                true
            },
        }
    }

    /// Decodes objects until the next separator or the terminator.
    pub fn read_group(&mut self) -> Result<Vec<T>> {
        let mut out: Vec<T> = Vec::new();
        for object in self.by_ref() {
            out.push(object?);
        }
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.conn
    }

    fn next_block(
        &mut self,
    ) -> Result<Option<Vec<T>>> {
        let header = match read_marker(&mut self.conn)? {
            Marker::Block(header) => header,
            Marker::Separator => {
                self.stop = Some(Stop::Separator);
                return Ok(None)
            },
            Marker::End => {
                self.stop = Some(Stop::End);
                return Ok(None)
            },
        };

        // Grows with the bytes actually present, not with the header
        let mut stored: Vec<u8> = Vec::new();
        (&mut self.conn).take(header.stored_len as u64).read_to_end(&mut stored)?;
        if stored.len() != header.stored_len as usize {
            return Err(Error::corrupted(format!("block truncated after {} of {} bytes", stored.len(), header.stored_len)));
        }
        let raw = unpack_block(&header, &stored)?;

        let mut objects: Vec<T> = Vec::with_capacity((header.num_records as usize).min(raw.len()));
        let mut offset = 0;
        for _ in 0..header.num_records {
            let (object, nbytes): (T, usize) = decode_from_slice(&raw[offset..], bincode::config::standard())?;
            objects.push(object);
            offset += nbytes;
        }
        if offset != raw.len() {
            return Err(Error::corrupted(format!("{} trailing bytes in block", raw.len() - offset)));
        }
        Ok(Some(objects))
    }
}

impl<R: Read, T: Decode<()>> Iterator for BlockDecoder<R, T> {
    type Item = Result<T>;

    fn next(
        &mut self,
    ) -> Option<Result<T>> {
        loop {
            if let Some(object) = self.block.next() {
                return Some(Ok(object))
            }
            if self.stop.is_some() || self.failed {
                return None
            }
            match self.next_block() {
                Ok(Some(objects)) => self.block = objects.into_iter(),
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e))
                },
            }
        }
    }
}
