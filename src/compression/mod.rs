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

//! Block payload compression and checksums.

use crate::error::Error;
use crate::error::Result;
use crate::headers::block::BlockHeader;
use crate::headers::block::FLAG_COMPRESSED;
use crate::headers::block::FLAG_DATA;
use crate::headers::block::MAX_BLOCK_LEN;

use std::io::Read;
use std::io::Write;

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

/// Seed of the block checksum, fixed by the format.
pub const CHECKSUM_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

pub fn checksum(bytes: &[u8]) -> u32 {
    wyhash::wyhash(bytes, CHECKSUM_SEED) as u32
}

pub fn deflate_bytes(
    bytes: &[u8],
) -> Result<Vec<u8>> {
    let mut deflated: Vec<u8> = Vec::new();
    let mut encoder = DeflateEncoder::new(&mut deflated, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(deflated)
}

pub fn inflate_bytes(
    bytes: &[u8],
    raw_len: usize,
) -> Result<Vec<u8>> {
    let mut inflated: Vec<u8> = Vec::with_capacity(raw_len.min(MAX_BLOCK_LEN as usize));
    // One byte past the expected length is enough to notice a mismatch
    let mut decoder = DeflateDecoder::new(bytes).take(raw_len as u64 + 1);
    decoder.read_to_end(&mut inflated).map_err(|e| Error::corrupted(format!("cannot inflate block: {}", e)))?;
    Ok(inflated)
}

/// Builds the header and stored payload for `raw` holding `num_records` objects.
///
/// The payload is stored deflated only if that makes it smaller.
pub fn pack_block(
    raw: &[u8],
    num_records: u32,
) -> Result<(BlockHeader, Vec<u8>)> {
    if num_records == 0 {
        return Err(Error::protocol("tried to write a block with zero objects"));
    }
    if raw.len() > MAX_BLOCK_LEN as usize {
        return Err(Error::protocol(format!("block of {} bytes is too large", raw.len())));
    }
    let deflated = deflate_bytes(raw)?;
    let (flags, stored) = if deflated.len() < raw.len() {
        (FLAG_DATA | FLAG_COMPRESSED, deflated)
    } else {
        (FLAG_DATA, raw.to_vec())
    };
    let header = BlockHeader {
        flags,
        num_records,
        raw_len: raw.len() as u32,
        stored_len: stored.len() as u32,
        checksum: checksum(raw),
    };
    Ok((header, stored))
}

/// Inverse of [pack_block], verifies the length and checksum.
pub fn unpack_block(
    header: &BlockHeader,
    stored: &[u8],
) -> Result<Vec<u8>> {
    let raw = if header.is_compressed() {
        inflate_bytes(stored, header.raw_len as usize)?
    } else {
        stored.to_vec()
    };
    if raw.len() != header.raw_len as usize {
        return Err(Error::corrupted(format!("block should hold {} bytes, got {}", header.raw_len, raw.len())));
    }
    if checksum(&raw) != header.checksum {
        return Err(Error::corrupted("block checksum does not match"));
    }
    Ok(raw)
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn pack_unpack_compressible() {
        use super::{pack_block, unpack_block};

        let raw: Vec<u8> = b"TGTGCCAGCAGC".iter().cycle().take(1200).copied().collect();
        let (header, stored) = pack_block(&raw, 100).unwrap();

        assert!(header.is_compressed());
        assert!(stored.len() < raw.len());
        assert_eq!(unpack_block(&header, &stored).unwrap(), raw);
    }

    #[test]
    fn incompressible_is_stored_raw() {
        use super::{pack_block, unpack_block};

        let raw: Vec<u8> = vec![7, 1, 250];
        let (header, stored) = pack_block(&raw, 1).unwrap();

        assert!(!header.is_compressed());
        assert_eq!(stored, raw);
        assert_eq!(unpack_block(&header, &stored).unwrap(), raw);
    }

    #[test]
    fn checksum_mismatch_is_corrupted() {
        use super::{pack_block, unpack_block};
        use crate::error::Error;

        let raw: Vec<u8> = vec![7, 1, 250];
        let (header, mut stored) = pack_block(&raw, 1).unwrap();
        stored[1] = 2;

        assert!(matches!(unpack_block(&header, &stored), Err(Error::Corrupted(_))));
    }

    #[test]
    fn inflating_stops_past_the_declared_length() {
        use super::{pack_block, unpack_block};
        use crate::error::Error;

        let raw: Vec<u8> = vec![0; 4096];
        let (mut header, stored) = pack_block(&raw, 1).unwrap();
        header.raw_len = 100;

        assert!(matches!(unpack_block(&header, &stored), Err(Error::Corrupted(_))));
    }

    #[test]
    fn zero_records_is_protocol_error() {
        use super::pack_block;
        use crate::error::Error;

        assert!(matches!(pack_block(&[], 0), Err(Error::Protocol(_))));
    }
}
