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
use crate::assembler::accumulator::CloneAccumulator;
use crate::assembler::report::AssemblerListener;
use crate::error::Error;
use crate::error::Result;
use crate::genes::GeneId;
use crate::genes::GeneSignature;
use crate::genes::GeneType;
use crate::params::AssemblerParameters;

use std::cmp::Ordering;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering as AtomicOrdering;

use indexmap::IndexMap;

fn best_gene(accumulator: &CloneAccumulator, gene_type: GeneType) -> Option<&GeneId> {
    accumulator.genes().hits().and_then(|hits| hits.best_gene(gene_type))
}

/// Largest count first, then best V, J and C gene, then sequence.
pub fn compare_accumulators(a: &CloneAccumulator, b: &CloneAccumulator) -> Ordering {
    b.count().cmp(&a.count())
        .then_with(|| best_gene(a, GeneType::Variable).cmp(&best_gene(b, GeneType::Variable)))
        .then_with(|| best_gene(a, GeneType::Joining).cmp(&best_gene(b, GeneType::Joining)))
        .then_with(|| best_gene(a, GeneType::Constant).cmp(&best_gene(b, GeneType::Constant)))
        .then_with(|| a.clonal_sequence().nucleotides().cmp(&b.clonal_sequence().nucleotides()))
        .then_with(|| a.index().cmp(&b.index()))
}

/// Outcome of [CloneAccumulatorContainer::build].
#[derive(Debug, Default)]
pub struct ContainerBuild {
    pub survivors: Vec<CloneAccumulator>,
    /// `(minor, major)` clone indices.
    pub pre_clustered: Vec<(i64, i64)>,
    /// Clone indices filtered out, pre-clustered minors of dropped clones included.
    pub dropped: Vec<i64>,
}

/// All clonotypes sharing one clonal sequence, keyed by gene signature.
#[derive(Debug, Default)]
pub struct CloneAccumulatorContainer {
    accumulators: IndexMap<GeneSignature, CloneAccumulator>,
}

impl CloneAccumulatorContainer {
    pub fn new() -> Self {
        CloneAccumulatorContainer::default()
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    pub fn accumulators(&self) -> impl Iterator<Item = &CloneAccumulator> {
        self.accumulators.values()
    }

    pub fn get_by_index_mut(&mut self, index: i64) -> Option<&mut CloneAccumulator> {
        self.accumulators.values_mut().find(|x| x.index() == index)
    }

    /// Adds a core read to the clonotype with its signature, creating it if needed.
    ///
    /// New clonotypes take their index from `next_index` while the caller
    /// holds the container, so the index is known as soon as the clonotype exists.
    pub fn accumulate(
        &mut self,
        pre_clone: &PreClone,
        signature: GeneSignature,
        params: &AssemblerParameters,
        next_index: &AtomicI64,
        listener: &dyn AssemblerListener,
    ) -> Result<i64> {
        let Some(clonal_sequence) = pre_clone.clonal_sequence.as_ref() else {
            return Err(Error::protocol(format!("read {} has no clonal sequence", pre_clone.index)));
        };
        let accumulator = match self.accumulators.entry(signature) {
            indexmap::map::Entry::Occupied(entry) => entry.into_mut(),
            indexmap::map::Entry::Vacant(entry) => {
                let index = next_index.fetch_add(1, AtomicOrdering::SeqCst);
                let signature = entry.key().clone();
                let created = entry.insert(CloneAccumulator::new(index, signature, clonal_sequence.clone(), pre_clone.n_regions.clone(), params.quality_aggregation));
                listener.on_new_clone_created(created);
                created
            },
        };
        accumulator.accumulate(pre_clone, false)?;
        Ok(accumulator.index())
    }

    /// Aggregates genes, pre-clusters and filters the clonotypes.
    pub fn build(
        self,
        params: &AssemblerParameters,
        listener: &dyn AssemblerListener,
    ) -> Result<ContainerBuild> {
        let mut accumulators: Vec<CloneAccumulator> = self.accumulators.into_values().collect();
        for accumulator in accumulators.iter_mut() {
            accumulator.aggregate_genes(&params.relative_min_scores)?;
        }
        accumulators.sort_by(compare_accumulators);

        let mut out = ContainerBuild::default();

        // Pre-clustering
        let counts: Vec<u64> = accumulators.iter().map(|x| x.count()).collect();
        let mut merged_into: Vec<Option<usize>> = vec![None; accumulators.len()];
        for i in 0..accumulators.len() {
            if merged_into[i].is_some() {
                continue;
            }
            for j in (i + 1)..accumulators.len() {
                if merged_into[j].is_some() {
                    continue;
                }
                let (head, tail) = accumulators.split_at_mut(j);
                let (major, minor) = (&mut head[i], &tail[0]);
                if major.signature().is_compatible(minor.signature())
                    && counts[j] as f64 <= counts[i] as f64 * params.pre_clustering.maximal_ratio {
                    listener.on_pre_clustered(major, minor);
                    major.merge(minor)?;
                    merged_into[j] = Some(i);
                    out.pre_clustered.push((minor.index(), major.index()));
                }
            }
        }

        let children: Vec<Vec<i64>> = (0..accumulators.len()).map(|head| {
            merged_into.iter().enumerate().filter(|(_, x)| **x == Some(head)).map(|(idx, _)| accumulators[idx].index()).collect()
        }).collect();

        // Gene score filter
        let heads: Vec<usize> = (0..accumulators.len()).filter(|x| merged_into[*x].is_none()).collect();
        let top_count = heads.iter().map(|x| accumulators[*x].count()).max().unwrap_or(0);
        let reference_count = top_count as f64 / params.pre_clustering.count_filtering_ratio;
        let reference = |gene_type: GeneType| -> f32 {
            heads.iter().filter(|x| accumulators[**x].count() as f64 >= reference_count)
                .map(|x| accumulators[*x].genes().hits().map(|h| h.best_score(gene_type)).unwrap_or(0.0))
                .fold(0.0, f32::max)
        };
        // Only gene types that separate clonotypes take part
        let minimal_scores: Vec<(GeneType, f32)> = [GeneType::Variable, GeneType::Joining].into_iter()
            .filter(|x| params.separate_by(*x))
            .map(|x| (x, reference(x) / params.pre_clustering.score_filtering_ratio as f32))
            .collect();

        let mut keep: Vec<bool> = vec![false; accumulators.len()];
        for head in heads.iter() {
            let accumulator = &accumulators[*head];
            let hits = accumulator.genes().hits();
            let below = minimal_scores.iter().any(|(gene_type, min)| {
                hits.map(|h| h.best_score(*gene_type)).unwrap_or(0.0) < *min
            });
            if below {
                listener.on_dropped_by_score(accumulator);
                out.dropped.push(accumulator.index());
                out.dropped.extend(children[*head].iter().copied());
            } else {
                keep[*head] = true;
            }
        }

        // Quality filter
        for head in heads.iter() {
            if !keep[*head] {
                continue;
            }
            accumulators[*head].rebuild_clonal_sequence();
            if accumulators[*head].min_quality() < params.minimal_quality {
                listener.on_dropped_by_quality(&accumulators[*head]);
                out.dropped.push(accumulators[*head].index());
                out.dropped.extend(children[*head].iter().copied());
                keep[*head] = false;
            }
        }

        out.survivors = accumulators.into_iter().zip(keep).filter_map(|(x, k)| if k { Some(x) } else { None }).collect();
        Ok(out)
    }
}
