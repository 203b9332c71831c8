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

//! Merges clonotypes that look like PCR or sequencing errors of a larger one.
//!
//! Clonotypes are visited from the largest down. Each unclustered clonotype
//! starts a cluster and pulls in its neighbours in mutation space, layer by
//! layer, up to the configured depth.

use crate::assembler::accumulator::CloneAccumulator;
use crate::assembler::container::compare_accumulators;
use crate::assembler::report::AssemblerListener;
use crate::params::ClusteringParameters;
use crate::sequence::mutations::Mutations;
use crate::tags::overlap_fraction;
use crate::tree::AnyMutation;
use crate::tree::SequenceTree;

use std::collections::VecDeque;

use log::info;

/// Decides whether `minor` is an erroneous copy of `major`.
///
/// `mutations` turn the clonal sequence of `major` into that of `minor`.
pub fn admit(
    major: &CloneAccumulator,
    minor: &CloneAccumulator,
    mutations: &Mutations,
    params: &ClusteringParameters,
) -> bool {
    if !major.clonal_sequence().is_compatible(minor.clonal_sequence(), mutations) {
        return false;
    }

    if let Some(min_overlap) = params.minimal_tag_set_overlap {
        let overlap = overlap_fraction(&major.tags().prefixes(params.tag_prefix_depth), &minor.tags().prefixes(params.tag_prefix_depth));
        if overlap > min_overlap {
            return true;
        }
    }

    let outside_n_regions = mutations.iter().filter(|mutation| {
        !major.n_regions().iter().any(|region| region.contains(mutation.position()))
    }).count();
    if outside_n_regions > params.max_mutations_outside_n_regions {
        return false;
    }

    let expected = major.count() as f64
        * params.specific_mutation_probability.powi(mutations.len() as i32)
        * major.clonal_sequence().len() as f64;
    if minor.count() as f64 > expected {
        return false;
    }

    major.signature().is_compatible(minor.signature())
}

#[derive(Debug, Default)]
pub struct ClusteringOutcome {
    /// Cluster heads, largest first.
    pub heads: Vec<CloneAccumulator>,
    /// `(minor, head)` clone indices.
    pub clustered: Vec<(i64, i64)>,
}

pub fn cluster(
    mut accumulators: Vec<CloneAccumulator>,
    params: &ClusteringParameters,
    add_reads_count: bool,
    listener: &dyn AssemblerListener,
) -> ClusteringOutcome {
    accumulators.sort_by(compare_accumulators);

    let mut tree: SequenceTree<usize> = SequenceTree::new();
    accumulators.iter().enumerate().for_each(|(idx, x)| tree.insert(&x.clonal_sequence().nucleotides(), idx));

    let mut cluster_of: Vec<Option<usize>> = vec![None; accumulators.len()];
    let mut clustered: Vec<(i64, i64)> = Vec::new();
    for head in 0..accumulators.len() {
        if cluster_of[head].is_some() {
            continue;
        }
        cluster_of[head] = Some(head);

        let mut queue: VecDeque<(usize, usize)> = VecDeque::from([(head, 0)]);
        while let Some((node, depth)) = queue.pop_front() {
            if depth >= params.depth {
                continue;
            }
            let query = accumulators[node].clonal_sequence().nucleotides();
            for neighbour in tree.search(&query, &params.search, &AnyMutation) {
                for minor in neighbour.values.iter().map(|x| **x) {
                    if cluster_of[minor].is_some() {
                        continue;
                    }
                    if admit(&accumulators[node], &accumulators[minor], &neighbour.mutations, params) {
                        listener.on_clustered(&accumulators[head], &accumulators[minor]);
                        cluster_of[minor] = Some(head);
                        clustered.push((accumulators[minor].index(), accumulators[head].index()));
                        queue.push_back((minor, depth + 1));
                    }
                }
            }
        }
    }

    if add_reads_count {
        for idx in 0..accumulators.len() {
            let Some(head) = cluster_of[idx] else { continue };
            if head != idx {
                let minor = accumulators[idx].clone();
                accumulators[head].add_counts(&minor);
            }
        }
    }

    let heads: Vec<CloneAccumulator> = accumulators.into_iter().enumerate()
        .filter_map(|(idx, x)| if cluster_of[idx] == Some(idx) { Some(x) } else { None })
        .collect();
    info!("Clustering merged {} clonotypes into {} clusters", clustered.len(), heads.len());

    ClusteringOutcome { heads, clustered }
}
