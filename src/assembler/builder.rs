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

//! Turns the surviving accumulators into final clonotypes.
//!
//! Also keeps the chain of index changes made on the way (pre-clustering,
//! clustering, final renumbering) so each read can be traced to its clone.
use crate::assembler::accumulator::CloneAccumulator;
use crate::assembler::container::compare_accumulators;
use crate::assembler::report::AssemblerListener;
use crate::clonotype::CloneOrdering;
use crate::clonotype::Clonotype;
use crate::clonotype::ClonotypeSet;
use crate::genes::GeneHits;
use crate::mapping::MappingType;
use crate::params::AssemblerParameters;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use log::debug;
use log::info;
use roaring::RoaringTreemap;

/// Assigns the final gene hits of a clonotype.
pub trait GeneAligner: Sync {
    fn align(&self, accumulator: &CloneAccumulator) -> GeneHits;
}

/// Keeps the hits aggregated from the reads.
pub struct AggregatedHits;

impl GeneAligner for AggregatedHits {
    fn align(&self, accumulator: &CloneAccumulator) -> GeneHits {
        accumulator.hits()
    }
}

/// Where the clone indices of the assembly went.
#[derive(Debug, Default)]
pub struct CloneIndexMapping {
    pre_clustered: HashMap<i64, i64>,
    clustered: HashMap<i64, i64>,
    dropped: RoaringTreemap,
    final_ids: HashMap<i64, i64>,
}

impl CloneIndexMapping {
    pub fn new() -> Self {
        CloneIndexMapping::default()
    }

    pub fn add_pre_clustered(&mut self, minor: i64, major: i64) {
        self.pre_clustered.insert(minor, major);
    }

    pub fn add_clustered(&mut self, minor: i64, head: i64) {
        self.clustered.insert(minor, head);
    }

    pub fn add_dropped(&mut self, index: i64) {
        if let Ok(index) = u64::try_from(index) {
            self.dropped.insert(index);
        }
    }

    pub fn add_final(&mut self, index: i64, id: i64) {
        self.final_ids.insert(index, id);
    }

    fn is_dropped(&self, index: i64) -> bool {
        u64::try_from(index).is_ok_and(|x| self.dropped.contains(x))
    }

    /// Final clone id and mapping type of a read that went into clone `index`.
    ///
    /// Returns `(-1, DroppedWithClone)` when the clone, or any clone it was
    /// merged into, was filtered out.
    pub fn resolve(&self, index: i64, mapped: bool) -> (i64, MappingType) {
        let mut mapping_type = if mapped { MappingType::Mapped } else { MappingType::Core };
        let mut current = index;
        if self.is_dropped(current) {
            return (-1, MappingType::DroppedWithClone);
        }
        if let Some(major) = self.pre_clustered.get(&current) {
            current = *major;
            mapping_type = MappingType::PreClustered;
            if self.is_dropped(current) {
                return (-1, MappingType::DroppedWithClone);
            }
        }
        if let Some(head) = self.clustered.get(&current) {
            current = *head;
            mapping_type = MappingType::Clustered;
            if self.is_dropped(current) {
                return (-1, MappingType::DroppedWithClone);
            }
        }
        match self.final_ids.get(&current) {
            Some(id) => (*id, mapping_type),
            None => (-1, MappingType::DroppedWithClone),
        }
    }
}

/// Final step of the assembly.
pub struct CloneBuilder<'a> {
    params: &'a AssemblerParameters,
    aligner: &'a dyn GeneAligner,
    listener: &'a dyn AssemblerListener,
    processed: AtomicU64,
    total: AtomicU64,
}

impl<'a> CloneBuilder<'a> {
    pub fn new(
        params: &'a AssemblerParameters,
        aligner: &'a dyn GeneAligner,
        listener: &'a dyn AssemblerListener,
    ) -> Self {
        CloneBuilder { params, aligner, listener, processed: AtomicU64::new(0), total: AtomicU64::new(0) }
    }

    /// Fraction of accumulators processed, 0 before the build starts.
    pub fn progress(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0
        }
        self.processed.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Sorts, realigns and numbers the clonotypes.
    ///
    /// Final ids and clonotypes missing a required gene go into `mapping`.
    pub fn build(&self, mut accumulators: Vec<CloneAccumulator>, mapping: &mut CloneIndexMapping) -> ClonotypeSet {
        self.total.store(accumulators.len() as u64, Ordering::Relaxed);
        accumulators.sort_by(compare_accumulators);

        let step = (accumulators.len() / 10).max(1) as u64;
        let mut clones: Vec<Clonotype> = Vec::with_capacity(accumulators.len());
        for accumulator in accumulators.into_iter() {
            if self.processed.fetch_add(1, Ordering::Relaxed) % step == 0 {
                debug!("Building clonotypes: {:.0}%", self.progress() * 100.0);
            }
            let hits = self.aligner.align(&accumulator);
            if self.params.required_genes.iter().any(|gt| !hits.has(*gt)) {
                self.listener.on_missing_gene(&accumulator);
                mapping.add_dropped(accumulator.index());
                continue;
            }
            let id = clones.len() as i64;
            mapping.add_final(accumulator.index(), id);
            clones.push(Clonotype {
                id,
                targets: accumulator.clonal_sequence().segments().to_vec(),
                hits,
                tags: accumulator.tags().clone(),
                count: accumulator.count(),
                group_id: None,
            });
        }
        info!("Built {} clonotypes", clones.len());

        ClonotypeSet::new(clones, CloneOrdering::CountThenGenes)
    }
}
