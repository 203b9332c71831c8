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
use crate::error::Error;
use crate::error::Result;
use crate::genes::GeneHit;
use crate::genes::GeneHits;
use crate::genes::GeneId;
use crate::genes::GeneType;
use crate::params::RelativeMinScores;

use std::collections::BTreeMap;

/// Sums gene scores over the reads of a clonotype, then turns them into hits once.
#[derive(Clone, Debug)]
pub enum GeneAccumulator {
    Accumulating {
        scores: [BTreeMap<GeneId, f64>; 4],
        observations: [u64; 4],
    },
    Aggregated(GeneHits),
}

impl Default for GeneAccumulator {
    fn default() -> Self {
        GeneAccumulator::Accumulating { scores: Default::default(), observations: [0; 4] }
    }
}

impl GeneAccumulator {
    pub fn new() -> Self {
        GeneAccumulator::default()
    }

    pub fn accumulate(&mut self, hits: &GeneHits) -> Result<()> {
        match self {
            GeneAccumulator::Accumulating { scores, observations } => {
                GeneType::ALL.iter().for_each(|gene_type| {
                    let type_hits = hits.get(*gene_type);
                    if !type_hits.is_empty() {
                        observations[gene_type.index()] += 1;
                    }
                    type_hits.iter().for_each(|hit| {
                        *scores[gene_type.index()].entry(hit.gene.clone()).or_insert(0.0) += hit.score as f64;
                    });
                });
                Ok(())
            },
            GeneAccumulator::Aggregated(_) => Err(Error::protocol("gene scores accumulated after aggregation")),
        }
    }

    /// Keeps the genes scoring above `relative_min_scores` of the best one.
    ///
    /// Reported scores are averages over the reads that had a hit of the
    /// gene type, rounded to one decimal.
    pub fn aggregate(&mut self, relative_min_scores: &RelativeMinScores) -> Result<&GeneHits> {
        let hits = match self {
            GeneAccumulator::Aggregated(_) => return Err(Error::protocol("gene scores aggregated twice")),
            GeneAccumulator::Accumulating { scores, observations } => {
                let mut hits = GeneHits::new();
                for gene_type in GeneType::ALL {
                    let Some(threshold) = relative_min_scores.get(gene_type) else { continue };
                    let type_scores = &scores[gene_type.index()];
                    let n = observations[gene_type.index()];
                    if type_scores.is_empty() || n == 0 {
                        continue;
                    }
                    let max_sum = type_scores.values().cloned().fold(f64::MIN, f64::max);
                    let kept: Vec<GeneHit> = type_scores.iter().filter(|(_, sum)| **sum > max_sum * threshold as f64).map(|(gene, sum)| {
                        let score = (sum * 10.0 / n as f64).round() / 10.0;
                        GeneHit { gene: gene.clone(), score: score as f32 }
                    }).collect();
                    hits.set(gene_type, kept);
                }
                hits
            },
        };
        *self = GeneAccumulator::Aggregated(hits);
        match self {
            GeneAccumulator::Aggregated(hits) => Ok(hits),
            GeneAccumulator::Accumulating { .. } => Err(Error::protocol("gene aggregation did not complete")),
        }
    }

    /// Hits after aggregation.
    pub fn hits(&self) -> Option<&GeneHits> {
        match self {
            GeneAccumulator::Aggregated(hits) => Some(hits),
            GeneAccumulator::Accumulating { .. } => None,
        }
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self, GeneAccumulator::Aggregated(_))
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn aggregate_averages_and_filters() {
        use super::GeneAccumulator;
        use crate::genes::{GeneHit, GeneHits, GeneType};
        use crate::params::RelativeMinScores;

        let mut acc = GeneAccumulator::new();
        acc.accumulate(&GeneHits::new().with(GeneType::Variable, vec![GeneHit::new("V1", 100.0), GeneHit::new("V2", 95.0), GeneHit::new("V3", 10.0)])).unwrap();
        acc.accumulate(&GeneHits::new().with(GeneType::Variable, vec![GeneHit::new("V1", 101.0), GeneHit::new("V2", 99.0)])).unwrap();
        acc.accumulate(&GeneHits::new().with(GeneType::Joining, vec![GeneHit::new("J1", 33.3)])).unwrap();

        let hits = acc.aggregate(&RelativeMinScores::default()).unwrap();
        let v: Vec<(String, f32)> = hits.get(GeneType::Variable).iter().map(|x| (x.gene.0.clone(), x.score)).collect();
        assert_eq!(v, vec![("V1".to_string(), 100.5), ("V2".to_string(), 97.0)]);
        assert_eq!(hits.best_score(GeneType::Joining), 33.3);
        assert!(!hits.has(GeneType::Constant));
    }

    #[test]
    fn disabled_gene_type_has_no_hits() {
        use super::GeneAccumulator;
        use crate::genes::{GeneHit, GeneHits, GeneType};
        use crate::params::RelativeMinScores;

        let mut acc = GeneAccumulator::new();
        acc.accumulate(&GeneHits::new().with(GeneType::Constant, vec![GeneHit::new("IGHM", 40.0)])).unwrap();
        let params = RelativeMinScores { c: None, ..RelativeMinScores::default() };

        assert!(!acc.aggregate(&params).unwrap().has(GeneType::Constant));
    }

    #[test]
    fn one_shot() {
        use super::GeneAccumulator;
        use crate::error::Error;
        use crate::genes::GeneHits;
        use crate::params::RelativeMinScores;

        let mut acc = GeneAccumulator::new();
        assert!(acc.hits().is_none());
        acc.aggregate(&RelativeMinScores::default()).unwrap();
        assert!(acc.is_aggregated());
        assert!(matches!(acc.accumulate(&GeneHits::new()), Err(Error::Protocol(_))));
        assert!(matches!(acc.aggregate(&RelativeMinScores::default()), Err(Error::Protocol(_))));
    }
}
