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

//! Final clonotypes produced by the assembler.

use crate::genes::GeneHits;
use crate::genes::GeneType;
use crate::sequence::SequenceWithQuality;
use crate::tags::TagCount;

use bincode::{Decode, Encode};

/// Order of the clones in a [ClonotypeSet].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub enum CloneOrdering {
    /// Count descending, then best V, J and C gene, then sequence.
    #[default]
    CountThenGenes,
    Unsorted,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct Clonotype {
    /// Position of the clone in its set.
    pub id: i64,
    /// Consensus sequence of each assembling feature.
    pub targets: Vec<SequenceWithQuality>,
    pub hits: GeneHits,
    pub tags: TagCount,
    /// Number of reads, core and mapped.
    pub count: u64,
    pub group_id: Option<i64>,
}

impl Clonotype {
    pub fn best_gene(&self, gene_type: GeneType) -> Option<&str> {
        self.hits.best_gene(gene_type).map(|x| x.0.as_str())
    }

    /// Concatenated nucleotides of all targets.
    pub fn nucleotides(&self) -> Vec<u8> {
        self.targets.iter().flat_map(|x| x.seq.iter().copied()).collect()
    }
}

/// Clones of one assembly, ids equal positions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClonotypeSet {
    clones: Vec<Clonotype>,
    ordering: CloneOrdering,
}

impl ClonotypeSet {
    /// Renumbers the clones by position.
    pub fn new(mut clones: Vec<Clonotype>, ordering: CloneOrdering) -> Self {
        clones.iter_mut().enumerate().for_each(|(idx, x)| x.id = idx as i64);
        ClonotypeSet { clones, ordering }
    }

    pub fn len(&self) -> usize {
        self.clones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Clonotype> {
        usize::try_from(id).ok().and_then(|x| self.clones.get(x))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Clonotype> {
        self.clones.iter()
    }

    pub fn ordering(&self) -> CloneOrdering {
        self.ordering
    }

    pub fn total_count(&self) -> u64 {
        self.clones.iter().map(|x| x.count).sum()
    }

    pub fn into_clones(self) -> Vec<Clonotype> {
        self.clones
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn ids_follow_positions() {
        use super::{CloneOrdering, Clonotype, ClonotypeSet};
        use crate::genes::GeneHits;
        use crate::sequence::SequenceWithQuality;
        use crate::tags::TagCount;

        let clone = |count: u64| Clonotype {
            id: 99,
            targets: vec![SequenceWithQuality::with_uniform_quality(b"TGT", 30), SequenceWithQuality::with_uniform_quality(b"GCC", 30)],
            hits: GeneHits::new(),
            tags: TagCount::new(),
            count,
            group_id: None,
        };
        let set = ClonotypeSet::new(vec![clone(5), clone(3)], CloneOrdering::CountThenGenes);

        assert_eq!(set.get(1).unwrap().id, 1);
        assert_eq!(set.get(1).unwrap().count, 3);
        assert!(set.get(-1).is_none());
        assert_eq!(set.total_count(), 8);
        assert_eq!(set.get(0).unwrap().nucleotides(), b"TGTGCC".to_vec());
    }
}
