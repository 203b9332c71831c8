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

//! Standalone alignment to clone index.
//!
//! ## Format
//!
//! All integers are big endian.
//!
//! | section | contents |
//! |---|---|
//! | magic | u32 `0x95bf97e3` |
//! | by alignment | alignmentCount records sorted by alignment id |
//! | by clone | alignmentCount records sorted by clone, then alignment id |
//! | clone offsets | u64 per clone, position of its first record in the by clone section |
//! | cloneCount | u32 |
//! | alignmentCount | u64 |
//!
//! Records are [ReadToCloneMapping]s of [RECORD_SIZE] bytes. Records of
//! dropped reads sort before all clones in the by clone section.
//!
//! ## Usage
//!
//! ```rust
//! use clna::mapping::{MappingType, ReadToCloneMapping};
//! use clna::mapping::index::{MappingIndex, write_index};
//! use clna::params::AssemblyOptions;
//! use std::io::Cursor;
//!
//! let records = vec![
//!     ReadToCloneMapping::new(2, 20, 0, MappingType::Core).unwrap(),
//!     ReadToCloneMapping::new(0, 10, -1, MappingType::Dropped).unwrap(),
//!     ReadToCloneMapping::new(1, 11, 0, MappingType::Mapped).unwrap(),
//! ];
//! let mut bytes: Vec<u8> = Vec::new();
//! write_index(records.into_iter().map(Ok), 1, &mut bytes, &AssemblyOptions::default()).unwrap();
//!
//! let mut index = MappingIndex::new(Cursor::new(bytes)).unwrap();
//! assert_eq!(index.by_alignment(1).unwrap().unwrap().mapping_type, MappingType::Mapped);
//! let of_clone: Vec<u64> = index.of_clone(0).unwrap().iter().map(|x| x.alignments_id).collect();
//! assert_eq!(of_clone, vec![1, 2]);
//! ```
//!

use crate::clna::reader::ClnaReader;
use crate::collate::ExternalSorter;
use crate::collate::SortKey;
use crate::error::Error;
use crate::error::Result;
use crate::mapping::RECORD_SIZE;
use crate::mapping::ReadToCloneMapping;
use crate::params::AssemblyOptions;

use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use bincode::{Decode, Encode};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::info;

pub const INDEX_MAGIC: u32 = 0x95bf97e3;

/// Size of cloneCount and alignmentCount at the end of the file.
const COUNTS_SIZE: u64 = 12;

#[derive(Encode, Decode)]
struct ByAlignment(ReadToCloneMapping);

impl SortKey for ByAlignment {
    type Key = u64;

    fn sort_key(&self) -> u64 {
        self.0.alignments_id
    }

    fn heap_size(&self) -> usize {
        RECORD_SIZE + 3
    }
}

#[derive(Encode, Decode)]
struct ByClone(ReadToCloneMapping);

impl SortKey for ByClone {
    type Key = (i32, u64);

    fn sort_key(&self) -> (i32, u64) {
        (self.0.clone_index, self.0.alignments_id)
    }

    fn heap_size(&self) -> usize {
        RECORD_SIZE + 3
    }
}

/// Writes an index of `records` over `clone_count` clones.
///
/// Returns the number of records.
pub fn write_index<I, W>(
    records: I,
    clone_count: u32,
    conn: &mut W,
    options: &AssemblyOptions,
) -> Result<u64>
where
    I: Iterator<Item = Result<ReadToCloneMapping>>,
    W: Write,
{
    let budget = options.sort_memory_budget / 2;
    let mut by_alignment: ExternalSorter<ByAlignment> = ExternalSorter::new(budget, options.temp_dir.as_deref());
    let mut by_clone: ExternalSorter<ByClone> = ExternalSorter::new(budget, options.temp_dir.as_deref());
    for record in records {
        let record = record?;
        if record.clone_index >= 0 && record.clone_index as u32 >= clone_count {
            return Err(Error::protocol(format!("alignment {} points to clone {} of {}", record.alignments_id, record.clone_index, clone_count)));
        }
        by_alignment.push(ByAlignment(record))?;
        by_clone.push(ByClone(record))?;
    }
    let alignment_count = by_alignment.len();

    conn.write_u32::<BigEndian>(INDEX_MAGIC)?;
    let mut previous: Option<u64> = None;
    for record in by_alignment.finish()? {
        let record = record?.0;
        if previous == Some(record.alignments_id) {
            return Err(Error::protocol(format!("alignment {} is mapped twice", record.alignments_id)));
        }
        previous = Some(record.alignments_id);
        record.write_to(conn)?;
    }

    let mut counts: Vec<u64> = vec![0; clone_count as usize];
    let mut dropped: u64 = 0;
    for record in by_clone.finish()? {
        let record = record?.0;
        match usize::try_from(record.clone_index) {
            Ok(clone) => counts[clone] += 1,
            Err(_) => dropped += 1,
        }
        record.write_to(conn)?;
    }

    let mut offset = dropped;
    for count in counts.iter() {
        conn.write_u64::<BigEndian>(offset)?;
        offset += count;
    }
    conn.write_u32::<BigEndian>(clone_count)?;
    conn.write_u64::<BigEndian>(alignment_count)?;
    conn.flush()?;

    info!("Indexed {} alignments over {} clones ({} dropped)", alignment_count, clone_count, dropped);
    Ok(alignment_count)
}

/// Builds the index of a .clna file.
pub fn write_index_from_clna<R, W>(
    clna: &mut ClnaReader<R>,
    conn: &mut W,
    options: &AssemblyOptions,
) -> Result<u64>
where
    R: Read + Seek,
    W: Write,
{
    let clone_count = u32::try_from(clna.number_of_clones())
        .map_err(|_| Error::protocol(format!("{} clones do not fit in the index", clna.number_of_clones())))?;
    let records = clna.alignments()?.map(|alignment| {
        let alignment = alignment?;
        let clone_index = i32::try_from(alignment.clone_index)
            .map_err(|_| Error::corrupted(format!("clone index {} out of range", alignment.clone_index)))?;
        ReadToCloneMapping::new(alignment.alignments_index, alignment.read_id, clone_index, alignment.mapping_type)
    });
    write_index(records, clone_count, conn, options)
}

/// Random access to an index written by [write_index].
pub struct MappingIndex<R: Read + Seek> {
    conn: R,
    alignment_count: u64,
    clone_offsets: Vec<u64>,
}

impl<R: Read + Seek> MappingIndex<R> {
    pub fn new(mut conn: R) -> Result<Self> {
        conn.seek(SeekFrom::Start(0))?;
        let magic = conn.read_u32::<BigEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(Error::corrupted(format!("'{:#x}' is not a valid index magic", magic)));
        }
        let end = conn.seek(SeekFrom::End(0))?;
        if end < 4 + COUNTS_SIZE {
            return Err(Error::corrupted("index is too short"));
        }
        conn.seek(SeekFrom::Start(end - COUNTS_SIZE))?;
        let clone_count = conn.read_u32::<BigEndian>()? as u64;
        let alignment_count = conn.read_u64::<BigEndian>()?;

        let expected = alignment_count.checked_mul(2 * RECORD_SIZE as u64)
            .and_then(|x| x.checked_add(8 * clone_count + 4 + COUNTS_SIZE));
        if expected != Some(end) {
            return Err(Error::corrupted(format!("index of {} alignments and {} clones cannot be {} bytes", alignment_count, clone_count, end)));
        }

        conn.seek(SeekFrom::Start(4 + 2 * RECORD_SIZE as u64 * alignment_count))?;
        let mut clone_offsets: Vec<u64> = Vec::with_capacity(clone_count as usize);
        for _ in 0..clone_count {
            let offset = conn.read_u64::<BigEndian>()?;
            if offset > alignment_count || clone_offsets.last().is_some_and(|x| *x > offset) {
                return Err(Error::corrupted(format!("clone offset {} out of order", offset)));
            }
            clone_offsets.push(offset);
        }
        Ok(MappingIndex { conn, alignment_count, clone_offsets })
    }

    pub fn alignment_count(&self) -> u64 {
        self.alignment_count
    }

    pub fn clone_count(&self) -> usize {
        self.clone_offsets.len()
    }

    fn record(&mut self, section: u64, position: u64) -> Result<ReadToCloneMapping> {
        let offset = 4 + (section * self.alignment_count + position) * RECORD_SIZE as u64;
        self.conn.seek(SeekFrom::Start(offset))?;
        ReadToCloneMapping::read_from(&mut self.conn)
    }

    fn records(&mut self, section: u64, from: u64, to: u64) -> Result<Vec<ReadToCloneMapping>> {
        let offset = 4 + (section * self.alignment_count + from) * RECORD_SIZE as u64;
        self.conn.seek(SeekFrom::Start(offset))?;
        (from..to).map(|_| ReadToCloneMapping::read_from(&mut self.conn)).collect()
    }

    /// Binary search for the record of one alignment.
    pub fn by_alignment(&mut self, alignments_id: u64) -> Result<Option<ReadToCloneMapping>> {
        let (mut low, mut high) = (0, self.alignment_count);
        while low < high {
            let mid = low + (high - low) / 2;
            let record = self.record(0, mid)?;
            match record.alignments_id.cmp(&alignments_id) {
                std::cmp::Ordering::Equal => return Ok(Some(record)),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Ok(None)
    }

    /// Records of one clone sorted by alignment id, empty for unknown clones.
    pub fn of_clone(&mut self, clone_index: u32) -> Result<Vec<ReadToCloneMapping>> {
        let clone = clone_index as usize;
        let Some(from) = self.clone_offsets.get(clone).copied() else {
            return Ok(Vec::new())
        };
        let to = self.clone_offsets.get(clone + 1).copied().unwrap_or(self.alignment_count);
        self.records(1, from, to)
    }

    /// Records of the reads outside every clone.
    pub fn dropped(&mut self) -> Result<Vec<ReadToCloneMapping>> {
        let to = self.clone_offsets.first().copied().unwrap_or(self.alignment_count);
        self.records(1, 0, to)
    }
}
