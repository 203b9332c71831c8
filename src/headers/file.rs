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
use crate::clonotype::CloneOrdering;
use crate::error::Error;
use crate::error::Result;
use crate::params::AssemblerParameters;

use std::io::Read;
use std::io::Write;

use bincode::{Encode, Decode};
use bincode::encode_into_std_write;
use bincode::decode_from_slice;
use bincode::decode_from_std_read;

pub const CLNA_MAGIC: &[u8; 14] = b"MiXCR.CLNA.V11";
pub const VDJCA_MAGIC: &[u8; 14] = b"MiXCR.VDJC.V11";
pub const END_MAGIC: &[u8; 16] = b"#MiXCR.File.End#";

pub const TRAILER_SIZE: usize = 40;

/// Version of the library that wrote a file.
pub fn version_string() -> String {
    format!("clna v{}", env!("CARGO_PKG_VERSION"))
}

fn fixed_config() -> impl bincode::config::Config {
    bincode::config::standard().with_big_endian().with_fixed_int_encoding()
}

/// Everything needed to interpret the clones of a .clna file.
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct ClnaHeader {
    pub version: String,
    pub parameters: AssemblerParameters,
    pub ordering: CloneOrdering,
}

/// Fixed size record at the very end of a .clna file.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    /// Offset of the footer object.
    pub footer: u64,
    /// Offset of the first clone block.
    pub first_clone: u64,
    /// Offset of the alignment index.
    pub index_begin: u64,
    pub end_magic: [u8; 16],
}

impl Trailer {
    pub fn new(footer: u64, first_clone: u64, index_begin: u64) -> Self {
        Trailer { footer, first_clone, index_begin, end_magic: *END_MAGIC }
    }
}

pub fn encode_trailer(
    trailer: &Trailer,
) -> Result<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::with_capacity(TRAILER_SIZE);
    let nbytes = encode_into_std_write(trailer, &mut bytes, fixed_config())?;
    assert_eq!(nbytes, TRAILER_SIZE);
    Ok(bytes)
}

pub fn decode_trailer(
    bytes: &[u8],
) -> Result<Trailer> {
    let trailer: Trailer = decode_from_slice(bytes, fixed_config())?.0;
    if &trailer.end_magic != END_MAGIC {
        return Err(Error::corrupted("end magic does not match"));
    }
    Ok(trailer)
}

/// Writes the magic bytes, the clone count and the header object.
pub fn write_clna_header<W: Write>(
    conn: &mut W,
    clone_count: u64,
    header: &ClnaHeader,
) -> Result<u64> {
    conn.write_all(CLNA_MAGIC)?;
    let mut nbytes = CLNA_MAGIC.len();
    nbytes += encode_into_std_write(clone_count, conn, fixed_config())?;
    nbytes += encode_into_std_write(header, conn, bincode::config::standard())?;
    Ok(nbytes as u64)
}

pub fn read_clna_header<R: Read>(
    conn: &mut R,
) -> Result<(u64, ClnaHeader)> {
    let mut magic: [u8; 14] = [0_u8; 14];
    conn.read_exact(&mut magic)?;
    if &magic != CLNA_MAGIC {
        return Err(Error::corrupted(format!("'{}' is not a supported .clna magic", String::from_utf8_lossy(&magic))));
    }
    let clone_count: u64 = decode_from_std_read(conn, fixed_config())?;
    let header: ClnaHeader = decode_from_std_read(conn, bincode::config::standard())?;
    Ok((clone_count, header))
}

pub fn write_vdjca_header<W: Write>(
    conn: &mut W,
) -> Result<()> {
    conn.write_all(VDJCA_MAGIC)?;
    encode_into_std_write(version_string(), conn, bincode::config::standard())?;
    Ok(())
}

/// Returns the version string of the writer.
pub fn read_vdjca_header<R: Read>(
    conn: &mut R,
) -> Result<String> {
    let mut magic: [u8; 14] = [0_u8; 14];
    conn.read_exact(&mut magic)?;
    if &magic != VDJCA_MAGIC {
        return Err(Error::corrupted(format!("'{}' is not a supported .vdjca magic", String::from_utf8_lossy(&magic))));
    }
    Ok(decode_from_std_read(conn, bincode::config::standard())?)
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn trailer_round_trip() {
        use super::{Trailer, encode_trailer, decode_trailer};

        let trailer = Trailer::new(1000, 48, 900);
        let mut bytes = encode_trailer(&trailer).unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[24..40], b"#MiXCR.File.End#");
        assert_eq!(decode_trailer(&bytes).unwrap(), trailer);

        bytes[39] = b'?';
        assert!(decode_trailer(&bytes).is_err());
    }

    #[test]
    fn clna_header_rejects_bad_magic() {
        use super::{ClnaHeader, read_clna_header, write_clna_header, version_string};
        use crate::clonotype::CloneOrdering;
        use crate::params::AssemblerParameters;
        use std::io::Cursor;

        let header = ClnaHeader { version: version_string(), parameters: AssemblerParameters::default(), ordering: CloneOrdering::default() };
        let mut bytes: Vec<u8> = Vec::new();
        let nbytes = write_clna_header(&mut bytes, 3, &header).unwrap();
        assert_eq!(nbytes as usize, bytes.len());

        let (count, got) = read_clna_header(&mut Cursor::new(bytes.clone())).unwrap();
        assert_eq!(count, 3);
        assert_eq!(got, header);

        bytes[0] = b'X';
        assert!(read_clna_header(&mut Cursor::new(bytes)).is_err());
    }
}
