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

//! The .clna file: clones, their alignments and an index between the two.
//!
//! ## Layout
//!
//! | Section | Contents |
//! |---|---|
//! | header | magic, clone count, [ClnaHeader](crate::headers::file::ClnaHeader) |
//! | clones | block stream of [Clonotype](crate::clonotype::Clonotype) |
//! | alignments | block stream of alignments sorted by clone, one group per clone |
//! | index | [ClnaIndex] |
//! | footer | [AssemblerSummary](crate::assembler::report::AssemblerSummary) |
//! | trailer | [Trailer](crate::headers::file::Trailer) |
//!
//! The alignment groups are separated by separator markers. Alignments that
//! are not part of any clone come first, in a group with clone id -1 that is
//! only present when there are such alignments. Every clone has a group, an
//! empty one if no alignment points to it.
//!
//! ## Usage
//!
//! ```rust
//! use clna::alignment::VdjcAlignment;
//! use clna::assembler::report::AssemblerSummary;
//! use clna::clna::reader::ClnaReader;
//! use clna::clna::writer::ClnaWriter;
//! use clna::clonotype::{CloneOrdering, Clonotype, ClonotypeSet};
//! use clna::genes::GeneHits;
//! use clna::headers::file::{ClnaHeader, version_string};
//! use clna::mapping::MappingType;
//! use clna::params::{AssemblerParameters, AssemblyOptions};
//! use clna::sequence::SequenceWithQuality;
//! use clna::tags::TagCount;
//! use std::io::Cursor;
//!
//! let clone = Clonotype { id: 0, targets: vec![SequenceWithQuality::with_uniform_quality(b"TGTGCC", 30)], hits: GeneHits::new(), tags: TagCount::new(), count: 2, group_id: None };
//! let clones = ClonotypeSet::new(vec![clone], CloneOrdering::CountThenGenes);
//! let header = ClnaHeader { version: version_string(), parameters: AssemblerParameters::default(), ordering: clones.ordering() };
//!
//! let mut alignments: Vec<VdjcAlignment> = (0..3).map(|x| VdjcAlignment::new(x, x, GeneHits::new(), Vec::new())).collect();
//! alignments[0].clone_index = 0;
//! alignments[0].mapping_type = MappingType::Core;
//! alignments[2].clone_index = 0;
//! alignments[2].mapping_type = MappingType::Core;
//!
//! let mut bytes: Vec<u8> = Vec::new();
//! let mut writer = ClnaWriter::new(&mut bytes, &AssemblyOptions::default());
//! writer.write_clones(&header, &clones).unwrap();
//! writer.write_alignments(alignments.into_iter().map(Ok)).unwrap();
//! writer.finish(&AssemblerSummary::default()).unwrap();
//!
//! let mut reader = ClnaReader::new(Cursor::new(bytes)).unwrap();
//! assert_eq!(reader.number_of_clones(), 1);
//! assert_eq!(reader.number_of_alignments(), 3);
//! let of_clone: Vec<u64> = reader.alignments_of(0).unwrap().iter().map(|x| x.alignments_index).collect();
//! assert_eq!(of_clone, vec![0, 2]);
//! ```
//!

pub mod reader;
pub mod writer;

use crate::error::Error;
use crate::error::Result;

use bincode::{Decode, Encode};

/// Alignment group of one clone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// -1 for the alignments outside every clone.
    pub clone_id: i64,
    /// Absolute offset of the first block of the group.
    pub offset: u64,
    pub count: u64,
}

/// Index of the alignment section as stored on disk.
///
/// Offsets are delta encoded and all fields are varints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ClnaIndex {
    offset_deltas: Vec<u64>,
    counts: Vec<u64>,
    clone_ids: Vec<i64>,
}

impl ClnaIndex {
    pub fn from_entries(entries: &[IndexEntry]) -> Self {
        let mut previous = 0;
        let offset_deltas = entries.iter().map(|x| {
            let delta = x.offset - previous;
            previous = x.offset;
            delta
        }).collect();
        ClnaIndex {
            offset_deltas,
            counts: entries.iter().map(|x| x.count).collect(),
            clone_ids: entries.iter().map(|x| x.clone_id).collect(),
        }
    }

    /// Checks the index against the number of clones in the file.
    pub fn entries(&self, clone_count: u64) -> Result<Vec<IndexEntry>> {
        let n = self.clone_ids.len();
        if self.offset_deltas.len() != n || self.counts.len() != n {
            return Err(Error::corrupted("index columns differ in length"));
        }
        let unassigned = self.clone_ids.first().is_some_and(|x| *x == -1) as u64;
        if n as u64 != clone_count + unassigned {
            return Err(Error::corrupted(format!("index has {} entries for {} clones", n, clone_count)));
        }

        let mut offset: u64 = 0;
        let mut out: Vec<IndexEntry> = Vec::with_capacity(n);
        for (idx, ((delta, count), clone_id)) in self.offset_deltas.iter().zip(self.counts.iter()).zip(self.clone_ids.iter()).enumerate() {
            if *clone_id != idx as i64 - unassigned as i64 {
                return Err(Error::corrupted(format!("index entry {} is for clone {}", idx, clone_id)));
            }
            offset = offset.checked_add(*delta).ok_or_else(|| Error::corrupted("index offset overflows"))?;
            out.push(IndexEntry { clone_id: *clone_id, offset, count: *count });
        }
        Ok(out)
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn index_entries_round_trip() {
        use super::{ClnaIndex, IndexEntry};

        let entries = vec![
            IndexEntry { clone_id: -1, offset: 100, count: 4 },
            IndexEntry { clone_id: 0, offset: 180, count: 10 },
            IndexEntry { clone_id: 1, offset: 400, count: 0 },
        ];
        let index = ClnaIndex::from_entries(&entries);
        assert_eq!(index.offset_deltas, vec![100, 80, 220]);
        assert_eq!(index.entries(2).unwrap(), entries);
        assert!(index.entries(3).is_err());
    }

    #[test]
    fn gaps_in_clone_ids_are_corrupt() {
        use super::{ClnaIndex, IndexEntry};

        let entries = vec![
            IndexEntry { clone_id: 0, offset: 100, count: 4 },
            IndexEntry { clone_id: 2, offset: 180, count: 10 },
        ];
        assert!(ClnaIndex::from_entries(&entries).entries(2).is_err());
    }
}
