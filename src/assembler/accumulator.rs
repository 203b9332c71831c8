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
use crate::alignment::PreClone;
use crate::assembler::gene_accumulator::GeneAccumulator;
use crate::error::Error;
use crate::error::Result;
use crate::genes::GeneHits;
use crate::genes::GeneSignature;
use crate::params::RelativeMinScores;
use crate::sequence::ClonalSequence;
use crate::sequence::NRegion;
use crate::sequence::quality::QualityAggregationType;
use crate::sequence::quality::QualityAggregator;
use crate::tags::TagCount;

/// Everything known about one clonotype while reads are being assembled.
#[derive(Clone, Debug)]
pub struct CloneAccumulator {
    index: i64,
    signature: GeneSignature,
    clonal_sequence: ClonalSequence,
    genes: GeneAccumulator,
    quality: QualityAggregator,
    core_count: u64,
    mapped_count: u64,
    tags: TagCount,
    n_regions: Vec<NRegion>,
}

impl CloneAccumulator {
    pub fn new(
        index: i64,
        signature: GeneSignature,
        clonal_sequence: ClonalSequence,
        n_regions: Vec<NRegion>,
        quality_aggregation: QualityAggregationType,
    ) -> Self {
        let quality = QualityAggregator::new(quality_aggregation, clonal_sequence.len());
        CloneAccumulator {
            index, signature, clonal_sequence, quality, n_regions,
            genes: GeneAccumulator::new(),
            core_count: 0,
            mapped_count: 0,
            tags: TagCount::new(),
        }
    }

    /// Adds a read. Mapped reads only add to the mapped count.
    pub fn accumulate(&mut self, pre_clone: &PreClone, mapped: bool) -> Result<()> {
        if self.genes.is_aggregated() {
            return Err(Error::protocol(format!("read {} accumulated into clone {} after gene aggregation", pre_clone.index, self.index)));
        }
        if mapped {
            self.mapped_count += pre_clone.number_of_reads;
            return Ok(());
        }
        let Some(clonal_sequence) = pre_clone.clonal_sequence.as_ref() else {
            return Err(Error::protocol(format!("read {} has no clonal sequence", pre_clone.index)));
        };
        if clonal_sequence.len() != self.clonal_sequence.len() {
            return Err(Error::protocol(format!("read {} does not match the clonal sequence of clone {}", pre_clone.index, self.index)));
        }
        self.genes.accumulate(&pre_clone.hits)?;
        self.quality.aggregate(&clonal_sequence.qualities());
        self.tags.add(&pre_clone.tags);
        self.core_count += pre_clone.number_of_reads;
        Ok(())
    }

    pub fn aggregate_genes(&mut self, relative_min_scores: &RelativeMinScores) -> Result<()> {
        self.genes.aggregate(relative_min_scores)?;
        Ok(())
    }

    /// Replaces the clonal sequence qualities with the current consensus.
    pub fn rebuild_clonal_sequence(&mut self) {
        self.clonal_sequence = self.clonal_sequence.with_quality(&self.quality.quality());
    }

    /// Takes over the reads, tags and qualities of `minor`, which must
    /// share the clonal sequence.
    pub fn merge(&mut self, minor: &CloneAccumulator) -> Result<()> {
        if minor.quality.observations() > 0 {
            self.quality.merge(&minor.quality)?;
        }
        self.add_counts(minor);
        Ok(())
    }

    /// Takes over the reads and tags of `minor`, leaving qualities alone.
    pub fn add_counts(&mut self, minor: &CloneAccumulator) {
        self.core_count += minor.core_count;
        self.mapped_count += minor.mapped_count;
        self.tags.add(&minor.tags);
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn signature(&self) -> &GeneSignature {
        &self.signature
    }

    pub fn clonal_sequence(&self) -> &ClonalSequence {
        &self.clonal_sequence
    }

    /// Aggregated hits, empty before aggregation.
    pub fn hits(&self) -> GeneHits {
        self.genes.hits().cloned().unwrap_or_default()
    }

    pub fn genes(&self) -> &GeneAccumulator {
        &self.genes
    }

    pub fn core_count(&self) -> u64 {
        self.core_count
    }

    pub fn mapped_count(&self) -> u64 {
        self.mapped_count
    }

    pub fn count(&self) -> u64 {
        self.core_count + self.mapped_count
    }

    pub fn tags(&self) -> &TagCount {
        &self.tags
    }

    pub fn n_regions(&self) -> &[NRegion] {
        &self.n_regions
    }

    pub fn min_quality(&self) -> u8 {
        self.clonal_sequence.min_quality()
    }
}

// Tests
#[cfg(test)]
mod tests {
    use crate::alignment::PreClone;
    use crate::genes::{GeneHit, GeneHits, GeneSignature, GeneType};
    use crate::sequence::{ClonalSequence, SequenceWithQuality};
    use crate::tags::TagCount;

    fn pre_clone(index: u64, quality: u8, reads: u64) -> PreClone {
        let hits = GeneHits::new().with(GeneType::Variable, vec![GeneHit::new("V1", 100.0)]);
        let sequence = ClonalSequence::new(vec![SequenceWithQuality::with_uniform_quality(b"TGTGCC", quality)]);
        PreClone { index, hits, clonal_sequence: Some(sequence), n_regions: Vec::new(), tags: TagCount::singleton(&["c1"], 1.0), number_of_reads: reads }
    }

    fn accumulator() -> super::CloneAccumulator {
        use super::CloneAccumulator;
        use crate::sequence::quality::QualityAggregationType;

        let first = pre_clone(0, 30, 1);
        let signature = GeneSignature::from_hits(&first.hits, [true, true, false]);
        CloneAccumulator::new(0, signature, first.clonal_sequence.unwrap(), Vec::new(), QualityAggregationType::Max)
    }

    #[test]
    fn count_is_core_plus_mapped() {
        let mut acc = accumulator();
        let core = [1_u64, 3, 2];
        let mapped = [4_u64, 1];
        core.iter().enumerate().for_each(|(idx, n)| acc.accumulate(&pre_clone(idx as u64, 30, *n), false).unwrap());
        mapped.iter().enumerate().for_each(|(idx, n)| acc.accumulate(&pre_clone(10 + idx as u64, 5, *n), true).unwrap());

        assert_eq!(acc.core_count(), core.iter().sum::<u64>());
        assert_eq!(acc.mapped_count(), mapped.iter().sum::<u64>());
        assert_eq!(acc.count(), acc.core_count() + acc.mapped_count());
        assert_eq!(acc.tags().total(), 3.0);
    }

    #[test]
    fn mapped_reads_do_not_touch_quality() {
        let mut acc = accumulator();
        acc.accumulate(&pre_clone(0, 30, 1), false).unwrap();
        acc.accumulate(&pre_clone(1, 2, 1), true).unwrap();
        acc.rebuild_clonal_sequence();

        assert_eq!(acc.min_quality(), 30);
    }

    #[test]
    fn accumulate_after_aggregation_fails() {
        use crate::error::Error;
        use crate::params::RelativeMinScores;

        let mut acc = accumulator();
        acc.accumulate(&pre_clone(0, 30, 1), false).unwrap();
        acc.aggregate_genes(&RelativeMinScores::default()).unwrap();

        assert_eq!(acc.hits().best_gene(GeneType::Variable).unwrap().0, "V1");
        assert!(matches!(acc.accumulate(&pre_clone(1, 30, 1), false), Err(Error::Protocol(_))));
        assert!(matches!(acc.accumulate(&pre_clone(2, 30, 1), true), Err(Error::Protocol(_))));
    }

    #[test]
    fn merge_adds_counts() {
        let mut major = accumulator();
        let mut minor = accumulator();
        major.accumulate(&pre_clone(0, 30, 5), false).unwrap();
        minor.accumulate(&pre_clone(1, 40, 2), false).unwrap();
        minor.accumulate(&pre_clone(2, 40, 1), true).unwrap();
        major.merge(&minor).unwrap();
        major.rebuild_clonal_sequence();

        assert_eq!(major.core_count(), 7);
        assert_eq!(major.mapped_count(), 1);
        assert_eq!(major.min_quality(), 40);
    }

    #[test]
    fn counts_only_across_lengths() {
        use super::CloneAccumulator;
        use crate::sequence::quality::QualityAggregationType;

        let mut major = accumulator();
        major.accumulate(&pre_clone(0, 30, 5), false).unwrap();
        let read = PreClone {
            clonal_sequence: Some(ClonalSequence::new(vec![SequenceWithQuality::with_uniform_quality(b"TGTGC", 2)])),
            ..pre_clone(1, 2, 3)
        };
        let mut minor = CloneAccumulator::new(1, major.signature().clone(), read.clonal_sequence.clone().unwrap(), Vec::new(), QualityAggregationType::Max);
        minor.accumulate(&read, false).unwrap();

        assert!(major.clone().merge(&minor).is_err());
        major.add_counts(&minor);
        major.rebuild_clonal_sequence();
        assert_eq!(major.core_count(), 8);
        assert_eq!(major.clonal_sequence().len(), 6);
        assert_eq!(major.min_quality(), 30);
    }
}
