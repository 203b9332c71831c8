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

//! Mapping of deferred reads onto the clonotypes of the initial pass.
//!
//! A deferred read has a few low quality positions. It is mapped onto a
//! clonotype whose clonal sequence differs from the read only at those
//! positions. The number of differences allowed shrinks as the number of
//! low quality positions grows, so that the number of sequences a read could
//! match stays below a fixed budget.

use crate::alignment::PreClone;
use crate::assembler::container::CloneAccumulatorContainer;
use crate::assembler::report::AssemblerListener;
use crate::error::Error;
use crate::error::Result;
use crate::events::AssemblerEvent;
use crate::events::EventKind;
use crate::events::EventLog;
use crate::events::EventLogger;
use crate::genes::GeneSignature;
use crate::params::AssemblerParameters;
use crate::params::TreeSearchParameters;
use crate::sequence::ClonalSequence;
use crate::sequence::mutations::Mutation;
use crate::tree::MutationGuide;
use crate::tree::SequenceTree;

use std::path::Path;

use log::debug;
use parking_lot::Mutex;
use rand::distributions::Distribution;
use rand::distributions::WeightedIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Exact, unbounded count of sequence variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantsCount {
    // Base 2^64 digits, least significant first, no leading zero digits
    digits: Vec<u64>,
}

impl VariantsCount {
    fn new(value: u64) -> Self {
        let mut count = VariantsCount { digits: vec![value] };
        count.trim();
        count
    }

    fn trim(&mut self) {
        while self.digits.last() == Some(&0) {
            self.digits.pop();
        }
    }

    fn mul_small(&mut self, factor: u64) {
        let mut carry: u128 = 0;
        for digit in self.digits.iter_mut() {
            let x = *digit as u128 * factor as u128 + carry;
            *digit = x as u64;
            carry = x >> 64;
        }
        if carry > 0 {
            self.digits.push(carry as u64);
        }
        self.trim();
    }

    // Exact division, the caller guarantees `divisor` divides the value
    fn div_small(&mut self, divisor: u64) {
        let mut remainder: u128 = 0;
        for digit in self.digits.iter_mut().rev() {
            let x = (remainder << 64) | *digit as u128;
            *digit = (x / divisor as u128) as u64;
            remainder = x % divisor as u128;
        }
        self.trim();
    }

    fn add(&mut self, other: &VariantsCount) {
        if self.digits.len() < other.digits.len() {
            self.digits.resize(other.digits.len(), 0);
        }
        let mut carry = false;
        for (idx, digit) in self.digits.iter_mut().enumerate() {
            let (x, c1) = digit.overflowing_add(other.digits.get(idx).copied().unwrap_or(0));
            let (x, c2) = x.overflowing_add(carry as u64);
            *digit = x;
            carry = c1 || c2;
        }
        if carry {
            self.digits.push(1);
        }
    }

    /// The count, None when it does not fit in a u64.
    pub fn to_u64(&self) -> Option<u64> {
        match self.digits.len() {
            0 => Some(0),
            1 => Some(self.digits[0]),
            _ => None,
        }
    }
}

impl Ord for VariantsCount {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digits.len().cmp(&other.digits.len())
            .then_with(|| self.digits.iter().rev().cmp(other.digits.iter().rev()))
    }
}

impl PartialOrd for VariantsCount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Number of sequences within `k` substitutions of a sequence of length `n`.
///
/// `k` larger than `n` counts as `n`.
pub fn mapping_variants_count(n: usize, k: usize) -> VariantsCount {
    let mut total = VariantsCount::new(0);
    // C(n, i) * 3^i
    let mut term = VariantsCount::new(1);
    for i in 0..=k.min(n) {
        if i > 0 {
            term.mul_small(3 * (n - i + 1) as u64);
            term.div_small(i as u64);
        }
        total.add(&term);
    }
    total
}

/// Largest number of mismatches allowed for a read with `n` low quality positions.
#[derive(Clone, Debug)]
pub struct MappingThresholdCalculator {
    variants_budget: u64,
    max_value: usize,
}

impl MappingThresholdCalculator {
    pub fn new(variants_budget: u64, max_value: usize) -> Self {
        MappingThresholdCalculator { variants_budget, max_value }
    }

    /// Largest `k <= max_value` with `mapping_variants_count(n, k)` within the budget.
    pub fn threshold(&self, n: usize) -> usize {
        let mut k = 0;
        while k < self.max_value && mapping_variants_count(n, k + 1).to_u64().is_some_and(|x| x <= self.variants_budget) {
            k += 1;
        }
        k
    }
}

/// Allows substitutions at low quality positions of the read only.
struct BadPoints {
    bad: Vec<bool>,
}

impl MutationGuide for BadPoints {
    fn allow(&self, _query: &[u8], mutation: &Mutation) -> bool {
        match mutation {
            Mutation::Substitution { position, .. } => self.bad.get(*position).copied().unwrap_or(false),
            _ => false,
        }
    }
}

struct Candidate {
    container: usize,
    index: i64,
    signature: GeneSignature,
    core_count: u64,
}

/// Maps deferred reads, from any number of threads.
pub struct DeferredMapper<'a> {
    params: &'a AssemblerParameters,
    listener: &'a dyn AssemblerListener,
    containers: &'a [Mutex<CloneAccumulatorContainer>],
    sequences: Vec<ClonalSequence>,
    tree: SequenceTree<usize>,
    candidates: Vec<Vec<Candidate>>,
    thresholds: MappingThresholdCalculator,
    events: EventLogger,
    expected: u64,
}

impl<'a> DeferredMapper<'a> {
    /// Indexes the clonal sequences of `containers`.
    ///
    /// Core counts are taken now, so ties are broken the same way whatever
    /// order the deferred reads arrive in. Candidates are ordered by
    /// container and signature.
    pub fn new(
        params: &'a AssemblerParameters,
        listener: &'a dyn AssemblerListener,
        containers: &'a [Mutex<CloneAccumulatorContainer>],
        expected: u64,
        temp_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut tree: SequenceTree<usize> = SequenceTree::new();
        let mut sequences: Vec<ClonalSequence> = Vec::with_capacity(containers.len());
        let mut candidates: Vec<Vec<Candidate>> = Vec::with_capacity(containers.len());
        for (idx, container) in containers.iter().enumerate() {
            let container = container.lock();
            let mut snapshot: Vec<Candidate> = container.accumulators().map(|x| Candidate {
                container: idx,
                index: x.index(),
                signature: x.signature().clone(),
                core_count: x.core_count(),
            }).collect();
            // Creation order depends on thread scheduling, signatures do not
            snapshot.sort_by(|a, b| a.signature.cmp(&b.signature));
            let sequence = container.accumulators().next().map(|x| x.clonal_sequence().clone()).unwrap_or_default();
            tree.insert(&sequence.nucleotides(), idx);
            sequences.push(sequence);
            candidates.push(snapshot);
        }
        debug!("Indexed {} clonal sequences for mapping", sequences.len());

        Ok(DeferredMapper {
            params, listener, containers, sequences, tree, candidates, expected,
            thresholds: MappingThresholdCalculator::new(params.mapping_variants_budget, params.max_mapping_mismatches),
            events: EventLogger::new(temp_dir)?,
        })
    }

    fn choose<'c>(&self, pre_clone: &PreClone, candidates: &[&'c Candidate]) -> Result<&'c Candidate> {
        if candidates.len() == 1 {
            return Ok(candidates[0]);
        }
        let weights: Vec<u64> = candidates.iter().map(|x| x.core_count.max(1)).collect();
        let distribution = WeightedIndex::new(&weights)
            .map_err(|e| Error::protocol(format!("cannot weigh mapping candidates: {}", e)))?;
        let mut rng = ChaCha8Rng::seed_from_u64(pre_clone.index);
        Ok(candidates[distribution.sample(&mut rng)])
    }

    /// Maps the `ordinal`th deferred read.
    pub fn map(&self, ordinal: u64, pre_clone: &PreClone) -> Result<()> {
        let Some(sequence) = pre_clone.clonal_sequence.as_ref() else {
            return Err(Error::protocol(format!("deferred read {} has no clonal sequence", pre_clone.index)));
        };
        let mut bad = vec![false; sequence.len()];
        let bad_points = sequence.bad_points(self.params.bad_quality_threshold);
        bad_points.iter().for_each(|x| bad[*x] = true);
        let max_mismatches = self.thresholds.threshold(bad_points.len());

        let signature = GeneSignature::from_hits(&pre_clone.hits, self.params.separate());
        let neighbours = self.tree.search(&sequence.nucleotides(), &TreeSearchParameters::substitutions_only(max_mismatches), &BadPoints { bad });

        let mut best: Option<(usize, Vec<&Candidate>)> = None;
        for neighbour in neighbours.iter() {
            if best.as_ref().is_some_and(|(errors, _)| neighbour.errors > *errors) {
                break;
            }
            for container in neighbour.values.iter() {
                if !sequence.is_compatible(&self.sequences[**container], &neighbour.mutations) {
                    continue;
                }
                let compatible = self.candidates[**container].iter().filter(|x| x.signature.is_compatible(&signature));
                for candidate in compatible {
                    best.get_or_insert_with(|| (neighbour.errors, Vec::new())).1.push(candidate);
                }
            }
        }

        let kind = match best {
            None => {
                self.listener.on_deferred_dropped(pre_clone);
                EventKind::Dropped
            },
            Some((errors, candidates)) => {
                let chosen = self.choose(pre_clone, &candidates)?;
                let mut container = self.containers[chosen.container].lock();
                let accumulator = container.get_by_index_mut(chosen.index)
                    .ok_or_else(|| Error::protocol(format!("clone {} disappeared during mapping", chosen.index)))?;
                accumulator.accumulate(pre_clone, errors > 0)?;
                self.listener.on_deferred_mapped(pre_clone, errors);
                if errors > 0 { EventKind::Mapped(chosen.index) } else { EventKind::Assigned(chosen.index) }
            },
        };
        self.events.log(AssemblerEvent::new(ordinal, kind))
    }

    pub fn finish(self) -> Result<EventLog> {
        self.events.end(self.expected)
    }
}

// Tests
#[cfg(test)]
mod tests {
    use crate::alignment::PreClone;
    use crate::genes::{GeneHit, GeneHits, GeneType};
    use crate::sequence::{ClonalSequence, SequenceWithQuality};
    use crate::tags::TagCount;

    fn read(index: u64, seq: &[u8], qual: &[u8], v: &str) -> PreClone {
        let hits = GeneHits::new()
            .with(GeneType::Variable, vec![GeneHit::new(v, 100.0)])
            .with(GeneType::Joining, vec![GeneHit::new("J1", 50.0)]);
        let sequence = ClonalSequence::new(vec![SequenceWithQuality::new(seq, qual)]);
        PreClone { index, hits, clonal_sequence: Some(sequence), n_regions: Vec::new(), tags: TagCount::new(), number_of_reads: 1 }
    }

    fn containers(reads: &[(u64, PreClone)], params: &crate::params::AssemblerParameters) -> Vec<parking_lot::Mutex<super::CloneAccumulatorContainer>> {
        use crate::assembler::container::CloneAccumulatorContainer;
        use crate::assembler::report::NoopListener;
        use crate::genes::GeneSignature;
        use std::collections::BTreeMap;
        use std::sync::atomic::AtomicI64;

        let next = AtomicI64::new(0);
        let mut by_sequence: BTreeMap<Vec<u8>, CloneAccumulatorContainer> = BTreeMap::new();
        reads.iter().for_each(|(n, read)| {
            let key = read.clonal_sequence.as_ref().unwrap().nucleotides();
            let container = by_sequence.entry(key).or_default();
            (0..*n).for_each(|_| {
                container.accumulate(read, GeneSignature::from_hits(&read.hits, params.separate()), params, &next, &NoopListener).unwrap();
            });
        });
        by_sequence.into_values().map(parking_lot::Mutex::new).collect()
    }

    #[test]
    fn variants_count_increases() {
        use super::mapping_variants_count;

        assert_eq!(mapping_variants_count(5, 0).to_u64(), Some(1));
        assert_eq!(mapping_variants_count(5, 1).to_u64(), Some(16));
        assert_eq!(mapping_variants_count(5, 2).to_u64(), Some(16 + 90));
        // All 4^n sequences
        assert_eq!(mapping_variants_count(20, 20).to_u64(), Some(1 << 40));
        for n in 1..120 {
            for k in 1..=n {
                assert!(mapping_variants_count(n, k) > mapping_variants_count(n, k - 1), "n = {}, k = {}", n, k);
            }
        }
        assert_eq!(mapping_variants_count(2000, 1000).to_u64(), None);
    }

    #[test]
    fn variants_count_stops_at_sequence_length() {
        use super::mapping_variants_count;

        assert_eq!(mapping_variants_count(3, 7), mapping_variants_count(3, 3));
        assert_eq!(mapping_variants_count(0, 4).to_u64(), Some(1));
    }

    #[test]
    fn threshold_is_non_increasing() {
        use super::MappingThresholdCalculator;

        let calculator = MappingThresholdCalculator::new(10_000, 8);
        let thresholds: Vec<usize> = (0..200).map(|n| calculator.threshold(n)).collect();
        assert_eq!(thresholds[0], 8);
        assert!(thresholds.windows(2).all(|x| x[1] <= x[0]));
        assert_eq!(calculator.threshold(10), 3);
        assert_eq!(MappingThresholdCalculator::new(0, 8).threshold(1), 0);
    }

    #[test]
    fn maps_onto_closest_sequence() {
        use super::DeferredMapper;
        use crate::assembler::report::NoopListener;
        use crate::events::EventKind;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters::default();
        let reads = vec![
            (5, read(0, b"CCAAAT", &[30; 6], "V1")),
            (5, read(1, b"GGGGGG", &[30; 6], "V1")),
        ];
        let containers = containers(&reads, &params);
        let mapper = DeferredMapper::new(&params, &NoopListener, &containers, 3, None).unwrap();

        // Mismatch at the low quality position
        mapper.map(0, &read(10, b"CCTAAT", &[30, 30, 2, 30, 30, 30], "V1")).unwrap();
        // Exact match with a low quality base
        mapper.map(1, &read(11, b"CCAAAT", &[30, 30, 30, 2, 30, 30], "V1")).unwrap();
        // Mismatch at a high quality position
        mapper.map(2, &read(12, b"CCAATT", &[30, 30, 2, 30, 30, 30], "V1")).unwrap();

        let log = mapper.finish().unwrap();
        let got: Vec<EventKind> = log.reader().unwrap().map(|x| x.unwrap().kind).collect();
        assert_eq!(got, vec![EventKind::Mapped(0), EventKind::Assigned(0), EventKind::Dropped]);

        let container = containers[0].lock();
        let acc = container.accumulators().next().unwrap();
        assert_eq!(acc.core_count(), 6);
        assert_eq!(acc.mapped_count(), 1);
    }

    #[test]
    fn incompatible_signature_is_not_mapped() {
        use super::DeferredMapper;
        use crate::assembler::report::NoopListener;
        use crate::events::EventKind;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters::default();
        let reads = vec![(5, read(0, b"CCAAAT", &[30; 6], "V1"))];
        let containers = containers(&reads, &params);
        let mapper = DeferredMapper::new(&params, &NoopListener, &containers, 1, None).unwrap();
        mapper.map(0, &read(10, b"CCAAAT", &[2; 6], "V9")).unwrap();

        let got: Vec<EventKind> = mapper.finish().unwrap().reader().unwrap().map(|x| x.unwrap().kind).collect();
        assert_eq!(got, vec![EventKind::Dropped]);
    }

    #[test]
    fn ties_do_not_depend_on_creation_order() {
        use super::DeferredMapper;
        use crate::assembler::report::NoopListener;
        use crate::events::EventKind;
        use crate::genes::GeneSignature;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters::default();
        let v1 = (5, read(0, b"CCAAAT", &[30; 6], "V1"));
        let v2 = (5, read(1, b"CCAAAT", &[30; 6], "V2"));
        let mut query = read(42, b"CCTAAT", &[30, 30, 2, 30, 30, 30], "V1");
        query.hits.set(GeneType::Variable, Vec::new());

        let chosen = |reads: Vec<(u64, PreClone)>| -> GeneSignature {
            let containers = containers(&reads, &params);
            let mapper = DeferredMapper::new(&params, &NoopListener, &containers, 1, None).unwrap();
            mapper.map(0, &query).unwrap();
            let got: Vec<EventKind> = mapper.finish().unwrap().reader().unwrap().map(|x| x.unwrap().kind).collect();
            let EventKind::Mapped(index) = got[0] else { panic!("read was not mapped: {:?}", got) };
            let container = containers[0].lock();
            let signature = container.accumulators().find(|x| x.index() == index).unwrap().signature().clone();
            signature
        };

        assert_eq!(chosen(vec![v1.clone(), v2.clone()]), chosen(vec![v2, v1]));
    }

    #[test]
    fn ties_are_reproducible() {
        use super::DeferredMapper;
        use crate::assembler::report::NoopListener;
        use crate::events::EventKind;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters::default();
        let reads = vec![
            (5, read(0, b"CCAAAT", &[30; 6], "V1")),
            (5, read(1, b"CCGAAT", &[30; 6], "V1")),
            (5, read(2, b"CCCAAT", &[30; 6], "V1")),
        ];
        let query = read(77, b"CCTAAT", &[30, 30, 2, 30, 30, 30], "V1");

        let run = || -> Vec<EventKind> {
            let containers = containers(&reads, &params);
            let mapper = DeferredMapper::new(&params, &NoopListener, &containers, 4, None).unwrap();
            (0..4).for_each(|ordinal| mapper.map(ordinal, &query).unwrap());
            mapper.finish().unwrap().reader().unwrap().map(|x| x.unwrap().kind).collect()
        };

        let first = run();
        assert_eq!(first, run());
        assert!(first.iter().all(|x| matches!(x, EventKind::Mapped(_))));
        assert!(first.windows(2).all(|x| x[0] == x[1]));
    }
}
