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

//! File headers, trailers and block headers of the encoded formats.
//!
//! ## Block header
//!
//! Objects are stored in blocks. A [BlockHeader](block::BlockHeader) is
//! always 17 bytes long and big endian:
//!
//! - Flags (u8). Bit 0 marks a data block, bit 1 a deflated payload.
//! - Number of objects in the block (u32).
//! - Length of the decompressed payload (u32).
//! - Length of the stored payload (u32).
//! - Checksum of the decompressed payload (u32).
//!
//! A block stream is a sequence of blocks ending in a single zero byte. A
//! single byte with value 4 may appear between blocks to separate groups of
//! objects, the .clna alignment section uses it to mark clone boundaries.
//!
//! ## File headers
//!
//! A .clna file starts with the magic bytes `MiXCR.CLNA.V11`, the number of
//! clones as a big endian u64 and a [ClnaHeader](file::ClnaHeader) holding
//! the version string, the assembler parameters and the clone ordering. It
//! ends with a 40 byte [Trailer](file::Trailer).
//!
//! A .vdjca file starts with the magic bytes `MiXCR.VDJC.V11` and the version
//! string, followed by a single block stream of alignments.
//!

pub mod block;
pub mod file;
