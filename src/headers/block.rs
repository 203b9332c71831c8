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
use crate::error::Error;
use crate::error::Result;

use std::io::Read;

use bincode::{Encode, Decode};
use bincode::encode_into_std_write;
use bincode::decode_from_slice;

/// Block contains objects.
pub const FLAG_DATA: u8 = 1;
/// Block payload is deflated.
pub const FLAG_COMPRESSED: u8 = 2;

/// Single byte written in place of a header between groups of blocks.
pub const SEPARATOR: u8 = 4;
/// Single byte ending a block stream.
pub const TERMINATOR: u8 = 0;

pub const BLOCK_HEADER_SIZE: usize = 17;

/// Largest payload a block may hold, deflated or not.
pub const MAX_BLOCK_LEN: u32 = 1 << 28;

fn block_header_config() -> impl bincode::config::Config {
    bincode::config::standard().with_big_endian().with_fixed_int_encoding()
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub flags: u8,
    /// Number of objects in the block.
    pub num_records: u32,
    /// Length of the decompressed payload.
    pub raw_len: u32,
    /// Length of the payload as stored.
    pub stored_len: u32,
    /// Truncated wyhash of the decompressed payload.
    pub checksum: u32,
}

impl BlockHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

pub fn encode_block_header(
    header: &BlockHeader,
) -> Result<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::with_capacity(BLOCK_HEADER_SIZE);
    let nbytes = encode_into_std_write(
        header,
        &mut bytes,
        block_header_config(),
    )?;
    assert_eq!(nbytes, BLOCK_HEADER_SIZE);
    Ok(bytes)
}

pub fn decode_block_header(
    header_bytes: &[u8],
) -> Result<BlockHeader> {
    Ok(decode_from_slice(header_bytes, block_header_config())?.0)
}

/// What follows in a block stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Marker {
    Block(BlockHeader),
    Separator,
    End,
}

/// Reads the next header, separator or terminator.
pub fn read_marker<R: Read>(
    conn: &mut R,
) -> Result<Marker> {
    let mut header_bytes: [u8; BLOCK_HEADER_SIZE] = [0_u8; BLOCK_HEADER_SIZE];
    conn.read_exact(&mut header_bytes[0..1])?;
    match header_bytes[0] {
        TERMINATOR => Ok(Marker::End),
        SEPARATOR => Ok(Marker::Separator),
        flags if flags & FLAG_DATA != 0 => {
            conn.read_exact(&mut header_bytes[1..])?;
            let header = decode_block_header(&header_bytes)?;
            if header.num_records == 0 {
                return Err(Error::corrupted("block header with zero records"));
            }
            if header.raw_len > MAX_BLOCK_LEN || header.stored_len > MAX_BLOCK_LEN {
                return Err(Error::corrupted(format!("block of {} ({} stored) bytes is too large", header.raw_len, header.stored_len)));
            }
            Ok(Marker::Block(header))
        },
        flags => Err(Error::corrupted(format!("'{}' is not a valid block flag", flags))),
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn header_is_17_big_endian_bytes() {
        use super::{BlockHeader, encode_block_header, decode_block_header};

        let header = BlockHeader { flags: 3, num_records: 2, raw_len: 0x0100, stored_len: 5, checksum: 0xdeadbeef };
        let bytes = encode_block_header(&header).unwrap();

        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 2]);
        assert_eq!(&bytes[5..9], &[0, 0, 1, 0]);
        assert_eq!(&bytes[13..17], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_block_header(&bytes).unwrap(), header);
    }

    #[test]
    fn read_marker() {
        use super::{BlockHeader, Marker, encode_block_header, read_marker};
        use std::io::Cursor;

        let header = BlockHeader { flags: 1, num_records: 1, raw_len: 0, stored_len: 0, checksum: 0 };
        let mut bytes = vec![4_u8];
        bytes.append(&mut encode_block_header(&header).unwrap());
        bytes.push(0);
        bytes.push(8);

        let mut conn = Cursor::new(bytes);
        assert_eq!(read_marker(&mut conn).unwrap(), Marker::Separator);
        assert_eq!(read_marker(&mut conn).unwrap(), Marker::Block(header));
        assert_eq!(read_marker(&mut conn).unwrap(), Marker::End);
        assert!(read_marker(&mut conn).is_err());
    }

    #[test]
    fn oversized_block_is_corrupted() {
        use super::{BlockHeader, MAX_BLOCK_LEN, encode_block_header, read_marker};
        use crate::error::Error;

        let header = BlockHeader { flags: 1, num_records: 1, raw_len: 16, stored_len: MAX_BLOCK_LEN + 1, checksum: 0 };
        let bytes = encode_block_header(&header).unwrap();
        assert!(matches!(read_marker(&mut bytes.as_slice()), Err(Error::Corrupted(_))));

        let header = BlockHeader { flags: 3, num_records: 1, raw_len: u32::MAX, stored_len: 16, checksum: 0 };
        let bytes = encode_block_header(&header).unwrap();
        assert!(matches!(read_marker(&mut bytes.as_slice()), Err(Error::Corrupted(_))));
    }
}
