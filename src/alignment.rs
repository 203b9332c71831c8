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

//! Aligned reads consumed by the assembler.
//!
//! A [VdjcAlignment] is one read after V/D/J/C alignment: the gene hits with
//! their scores, the sequence of every assembling feature and the tags of
//! the read. The assembler works on the reduced [PreClone] view.

use crate::genes::GeneHits;
use crate::mapping::MappingType;
use crate::sequence::ClonalSequence;
use crate::sequence::NRegion;
use crate::sequence::SequenceWithQuality;
use crate::tags::TagCount;

use bincode::{Decode, Encode};

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct VdjcAlignment {
    /// Position of the alignment in the input, unique within a file.
    pub alignments_index: u64,
    pub read_id: u64,
    pub hits: GeneHits,
    /// Sequence of each assembling feature, None if the read does not cover it.
    pub features: Vec<Option<SequenceWithQuality>>,
    /// N-regions in concatenated feature coordinates.
    pub n_regions: Vec<NRegion>,
    pub tags: TagCount,
    /// Clone assigned by the assembler, -1 when there is none.
    pub clone_index: i64,
    pub mapping_type: MappingType,
}

impl VdjcAlignment {
    pub fn new(
        alignments_index: u64,
        read_id: u64,
        hits: GeneHits,
        features: Vec<Option<SequenceWithQuality>>,
    ) -> Self {
        VdjcAlignment {
            alignments_index, read_id, hits, features,
            n_regions: Vec::new(),
            tags: TagCount::new(),
            clone_index: -1,
            mapping_type: MappingType::Dropped,
        }
    }

    pub fn with_n_regions(mut self, n_regions: Vec<NRegion>) -> Self {
        self.n_regions = n_regions;
        self
    }

    pub fn with_tags(mut self, tags: TagCount) -> Self {
        self.tags = tags;
        self
    }

    /// Rough number of heap bytes held by this alignment.
    pub fn heap_size(&self) -> usize {
        let features: usize = self.features.iter().flatten().map(|x| 2 * x.len()).sum();
        let hits: usize = crate::genes::GeneType::ALL.iter().map(|gt| {
            self.hits.get(*gt).iter().map(|hit| hit.gene.0.len() + 8).sum::<usize>()
        }).sum();
        let tags: usize = self.tags.iter().map(|(tags, _)| tags.iter().map(|x| x.len() + 24).sum::<usize>() + 8).sum();
        std::mem::size_of::<VdjcAlignment>() + features + hits + tags + 8 * self.n_regions.len()
    }
}

/// The part of a read the assembler looks at.
#[derive(Clone, Debug, PartialEq)]
pub struct PreClone {
    /// Sequential index of the read in the input.
    pub index: u64,
    pub hits: GeneHits,
    /// None when any assembling feature is missing from the read.
    pub clonal_sequence: Option<ClonalSequence>,
    pub n_regions: Vec<NRegion>,
    pub tags: TagCount,
    pub number_of_reads: u64,
}

impl PreClone {
    pub fn from_alignment(alignment: &VdjcAlignment) -> Self {
        let clonal_sequence = if alignment.features.is_empty() {
            None
        } else {
            alignment.features.iter().cloned().collect::<Option<Vec<SequenceWithQuality>>>().map(ClonalSequence::new)
        };
        PreClone {
            index: alignment.alignments_index,
            hits: alignment.hits.clone(),
            clonal_sequence,
            n_regions: alignment.n_regions.clone(),
            tags: alignment.tags.clone(),
            number_of_reads: 1,
        }
    }
}
