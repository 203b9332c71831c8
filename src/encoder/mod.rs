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

//! Writes objects as a block stream.
//!
//! ## Usage
//!
//! ```rust
//! use clna::encoder::BlockEncoder;
//! use clna::decoder::BlockDecoder;
//!
//! let mut bytes: Vec<u8> = Vec::new();
//! let mut encoder = BlockEncoder::new(&mut bytes, 2);
//! encoder.write(&"first".to_string()).unwrap();
//! encoder.write(&"second".to_string()).unwrap();
//! encoder.write(&"third".to_string()).unwrap();
//! encoder.finish().unwrap();
//!
//! let decoder: BlockDecoder<_, String> = BlockDecoder::new(bytes.as_slice());
//! let got: Vec<String> = decoder.map(|x| x.unwrap()).collect();
//! assert_eq!(got, vec!["first", "second", "third"]);
//! ```

use crate::compression::pack_block;
use crate::error::Result;
use crate::headers::block::encode_block_header;
use crate::headers::block::SEPARATOR;
use crate::headers::block::TERMINATOR;

use std::io::Write;

use bincode::Encode;
use bincode::encode_into_std_write;

/// Objects per block unless told otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Counts the bytes that pass through to `inner`.
pub struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }

    pub fn position(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

pub struct BlockEncoder<W: Write> {
    conn: W,

    // Internals
    block: Vec<u8>,
    num_records: u32,
    block_size: usize,
    bytes_written: u64,
}

impl<W: Write> BlockEncoder<W> {
    pub fn new(
        conn: W,
        block_size: usize,
    ) -> Self {
        BlockEncoder {
            conn,
            block: Vec::new(), num_records: 0, block_size: block_size.max(1), bytes_written: 0,
        }
    }

    /// Bytes written to the underlying writer so far, buffered objects excluded.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write<T: Encode>(
        &mut self,
        object: &T,
    ) -> Result<()> {
        encode_into_std_write(object, &mut self.block, bincode::config::standard())?;
        self.num_records += 1;
        if self.num_records as usize >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Writes out the buffered objects, does nothing if there are none.
    pub fn flush_block(
        &mut self,
    ) -> Result<()> {
        if self.num_records == 0 {
            return Ok(())
        }
        let (header, stored) = pack_block(&self.block, self.num_records)?;
        let header_bytes = encode_block_header(&header)?;
        self.conn.write_all(&header_bytes)?;
        self.conn.write_all(&stored)?;
        self.bytes_written += (header_bytes.len() + stored.len()) as u64;
        self.block.clear();
        self.num_records = 0;
        Ok(())
    }

    /// Ends the current group of objects.
    pub fn write_separator(
        &mut self,
    ) -> Result<()> {
        self.flush_block()?;
        self.conn.write_all(&[SEPARATOR])?;
        self.bytes_written += 1;
        Ok(())
    }

    /// Flushes and writes the terminator, returns the total bytes written.
    pub fn finish(
        mut self,
    ) -> Result<u64> {
        self.flush_block()?;
        self.conn.write_all(&[TERMINATOR])?;
        self.conn.flush()?;
        self.bytes_written += 1;
        Ok(self.bytes_written)
    }
}
