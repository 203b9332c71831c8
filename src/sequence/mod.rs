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

//! Nucleotide sequences with per-base quality and the multi-segment
//! [ClonalSequence] used as the grouping key of a clonotype.
//!
//! Nucleotides are stored as upper case ASCII bytes (`A`, `C`, `G`, `T`,
//! `N`), qualities as raw phred scores (not offset by 33).

pub mod mutations;
pub mod quality;

use mutations::Mutation;
use mutations::Mutations;

use std::hash::Hash;
use std::hash::Hasher;

use bincode::{Decode, Encode};

/// Highest phred score produced by consensus quality aggregation.
pub const MAX_QUALITY: u8 = 50;

/// A nucleotide sequence and its per-base phred qualities.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Encode, Decode)]
pub struct SequenceWithQuality {
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl SequenceWithQuality {
    pub fn new(seq: &[u8], qual: &[u8]) -> Self {
        assert_eq!(seq.len(), qual.len());
        SequenceWithQuality { seq: seq.to_vec(), qual: qual.to_vec() }
    }

    /// Sequence where every base has the same quality.
    pub fn with_uniform_quality(seq: &[u8], quality: u8) -> Self {
        SequenceWithQuality { seq: seq.to_vec(), qual: vec![quality; seq.len()] }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn min_quality(&self) -> u8 {
        self.qual.iter().copied().min().unwrap_or(MAX_QUALITY)
    }
}

/// Half-open range of a non-templated insertion inside a clonal sequence.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Encode, Decode)]
pub struct NRegion {
    pub from: u32,
    pub to: u32,
}

impl NRegion {
    pub fn new(from: u32, to: u32) -> Self {
        assert!(from <= to);
        NRegion { from, to }
    }

    pub fn contains(&self, position: usize) -> bool {
        (self.from as usize) <= position && position < (self.to as usize)
    }
}

/// The clonal part of a read, made of one segment per assembling feature.
///
/// Equality and hashing look at nucleotides only. Two clonal sequences with
/// the same bases but different qualities are the same clonotype key.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct ClonalSequence {
    segments: Vec<SequenceWithQuality>,
}

impl PartialEq for ClonalSequence {
    fn eq(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self.segments.iter().zip(other.segments.iter()).all(|(a, b)| a.seq == b.seq)
    }
}

impl Eq for ClonalSequence {}

impl Hash for ClonalSequence {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.segments.len());
        for segment in self.segments.iter() {
            segment.seq.hash(state);
        }
    }
}

impl ClonalSequence {
    pub fn new(segments: Vec<SequenceWithQuality>) -> Self {
        ClonalSequence { segments }
    }

    pub fn segments(&self) -> &[SequenceWithQuality] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<SequenceWithQuality> {
        self.segments
    }

    /// Total number of bases over all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|x| x.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated nucleotides of all segments.
    pub fn nucleotides(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.segments.iter().for_each(|x| out.extend_from_slice(&x.seq));
        out
    }

    /// Concatenated qualities of all segments.
    pub fn qualities(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.segments.iter().for_each(|x| out.extend_from_slice(&x.qual));
        out
    }

    pub fn concatenated(&self) -> SequenceWithQuality {
        SequenceWithQuality { seq: self.nucleotides(), qual: self.qualities() }
    }

    pub fn min_quality(&self) -> u8 {
        self.segments.iter().map(|x| x.min_quality()).min().unwrap_or(MAX_QUALITY)
    }

    /// Positions (in concatenated coordinates) with quality at or below `threshold`.
    pub fn bad_points(&self, threshold: u8) -> Vec<usize> {
        self.qualities().iter().enumerate().filter_map(|(pos, q)| {
            if *q <= threshold { Some(pos) } else { None }
        }).collect()
    }

    /// Same nucleotides, qualities replaced by `quality` (concatenated coordinates).
    pub fn with_quality(&self, quality: &[u8]) -> ClonalSequence {
        assert_eq!(quality.len(), self.len());
        let mut start = 0;
        let segments = self.segments.iter().map(|segment| {
            let end = start + segment.len();
            let rebuilt = SequenceWithQuality { seq: segment.seq.clone(), qual: quality[start..end].to_vec() };
            start = end;
            rebuilt
        }).collect();
        ClonalSequence { segments }
    }

    /// Checks that `mutations`, applied to this sequence, produce a sequence
    /// with the same segment layout as `other`.
    ///
    /// Indels change the length of the segment they fall in. An insertion at
    /// the very end of the sequence belongs to the last segment.
    pub fn is_compatible(&self, other: &ClonalSequence, mutations: &Mutations) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        let total = self.len();
        let mut start = 0;
        for (idx, (segment, target)) in self.segments.iter().zip(other.segments.iter()).enumerate() {
            let end = start + segment.len();
            let is_last = idx + 1 == self.segments.len();
            let mut delta: isize = 0;
            for mutation in mutations.iter() {
                match *mutation {
                    Mutation::Insertion { position, .. } => {
                        if (start..end).contains(&position) || (is_last && position == total) {
                            delta += 1;
                        }
                    },
                    Mutation::Deletion { position, .. } => {
                        if (start..end).contains(&position) {
                            delta -= 1;
                        }
                    },
                    Mutation::Substitution { .. } => (),
                }
            }
            if segment.len() as isize + delta != target.len() as isize {
                return false;
            }
            start = end;
        }
        true
    }
}
