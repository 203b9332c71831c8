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

//! Assembler configuration.
//!
//! [AssemblerParameters] changes the result of an assembly and is stored in
//! the header of every .clna file. [AssemblyOptions] only changes how the
//! work is done (chunking, memory, temporary files).
//!
//! Parameters can be read from a TOML file where every field is optional:
//!
//! ```toml
//! bad_quality_threshold = 20
//! separate_by_c = true
//!
//! [pre_clustering]
//! maximal_ratio = 1.0
//!
//! [clustering]
//! depth = 2
//! specific_mutation_probability = 0.001
//! ```

use crate::error::Result;
use crate::genes::GeneType;
use crate::sequence::quality::QualityAggregationType;

use std::path::Path;
use std::path::PathBuf;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Error budget of a neighbourhood search in a [SequenceTree](crate::tree::SequenceTree).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct TreeSearchParameters {
    pub max_substitutions: usize,
    pub max_deletions: usize,
    pub max_insertions: usize,
    pub max_total_errors: usize,
}

impl Default for TreeSearchParameters {
    fn default() -> Self {
        TreeSearchParameters { max_substitutions: 2, max_deletions: 1, max_insertions: 1, max_total_errors: 2 }
    }
}

impl TreeSearchParameters {
    pub fn substitutions_only(max_substitutions: usize) -> Self {
        TreeSearchParameters { max_substitutions, max_deletions: 0, max_insertions: 0, max_total_errors: max_substitutions }
    }
}

/// Thresholds of the per-container pre-clustering and filtering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct PreClusteringParameters {
    /// Minor clonotype is merged only if `minor <= major * maximal_ratio`.
    pub maximal_ratio: f64,
    /// Clonotypes with `count >= head / count_filtering_ratio` define the reference scores.
    pub count_filtering_ratio: f64,
    /// Clonotypes with a V or J score below `max / score_filtering_ratio` are dropped.
    pub score_filtering_ratio: f64,
}

impl Default for PreClusteringParameters {
    fn default() -> Self {
        PreClusteringParameters { maximal_ratio: 1.0, count_filtering_ratio: 2.0, score_filtering_ratio: 3.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct ClusteringParameters {
    /// Number of search layers starting from the cluster head.
    pub depth: usize,
    pub search: TreeSearchParameters,
    /// Probability of one specific PCR or sequencing error at one position.
    pub specific_mutation_probability: f64,
    /// Admit a minor clonotype right away if its tag prefixes overlap more than this.
    pub minimal_tag_set_overlap: Option<f64>,
    /// Number of leading tags forming a tag prefix.
    pub tag_prefix_depth: usize,
    /// Mutations allowed outside of N-regions (templated V/D/J parts).
    pub max_mutations_outside_n_regions: usize,
    /// Add read counts of clustered clonotypes to the cluster head.
    pub add_reads_count_on_clustering: bool,
}

impl Default for ClusteringParameters {
    fn default() -> Self {
        ClusteringParameters {
            depth: 2,
            search: TreeSearchParameters::default(),
            specific_mutation_probability: 1e-3,
            minimal_tag_set_overlap: None,
            tag_prefix_depth: 1,
            max_mutations_outside_n_regions: 1,
            add_reads_count_on_clustering: false,
        }
    }
}

/// Relative score thresholds used when aggregating gene scores of a clonotype.
///
/// `None` disables the gene type, the clonotype then reports no hits for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct RelativeMinScores {
    pub v: Option<f32>,
    pub d: Option<f32>,
    pub j: Option<f32>,
    pub c: Option<f32>,
}

impl Default for RelativeMinScores {
    fn default() -> Self {
        RelativeMinScores { v: Some(0.8), d: Some(0.8), j: Some(0.8), c: Some(0.8) }
    }
}

impl RelativeMinScores {
    pub fn get(&self, gene_type: GeneType) -> Option<f32> {
        match gene_type {
            GeneType::Variable => self.v,
            GeneType::Diversity => self.d,
            GeneType::Joining => self.j,
            GeneType::Constant => self.c,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(default)]
pub struct AssemblerParameters {
    /// Reads with a shorter clonal sequence are dropped.
    pub minimal_clonal_sequence_length: usize,
    /// Bases at or below this quality are bad points.
    pub bad_quality_threshold: u8,
    /// Reads with more than `len * max_bad_points_percent` bad points are dropped.
    pub max_bad_points_percent: f64,
    /// Upper bound on the number of sequence variants explored when mapping a deferred read.
    pub mapping_variants_budget: u64,
    pub max_mapping_mismatches: usize,
    pub separate_by_v: bool,
    pub separate_by_j: bool,
    pub separate_by_c: bool,
    pub quality_aggregation: QualityAggregationType,
    /// Clonotypes with a lower minimal consensus quality are dropped.
    pub minimal_quality: u8,
    pub relative_min_scores: RelativeMinScores,
    pub pre_clustering: PreClusteringParameters,
    /// Clustering is skipped when absent.
    pub clustering: Option<ClusteringParameters>,
    /// Gene types every final clonotype must have a hit for.
    pub required_genes: Vec<GeneType>,
}

impl Default for AssemblerParameters {
    fn default() -> Self {
        AssemblerParameters {
            minimal_clonal_sequence_length: 12,
            bad_quality_threshold: 20,
            max_bad_points_percent: 0.7,
            mapping_variants_budget: 10_000,
            max_mapping_mismatches: 8,
            separate_by_v: true,
            separate_by_j: true,
            separate_by_c: false,
            quality_aggregation: QualityAggregationType::Max,
            minimal_quality: 0,
            relative_min_scores: RelativeMinScores::default(),
            pre_clustering: PreClusteringParameters::default(),
            clustering: Some(ClusteringParameters::default()),
            required_genes: vec![GeneType::Variable, GeneType::Joining],
        }
    }
}

impl AssemblerParameters {
    /// Deferred reads are only produced when mapping can pick them up.
    pub fn mapping_enabled(&self) -> bool {
        self.bad_quality_threshold > 0 && self.max_bad_points_percent > 0.0
    }

    pub fn separate(&self) -> [bool; 3] {
        [self.separate_by_v, self.separate_by_j, self.separate_by_c]
    }

    pub fn separate_by(&self, gene_type: GeneType) -> bool {
        match gene_type {
            GeneType::Variable => self.separate_by_v,
            GeneType::Joining => self.separate_by_j,
            GeneType::Constant => self.separate_by_c,
            GeneType::Diversity => false,
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

/// Execution settings that do not change the assembly result.
#[derive(Clone, Debug)]
pub struct AssemblyOptions {
    /// Number of alignments handed to the worker threads at once.
    pub chunk_size: usize,
    /// Approximate number of bytes kept in memory by external sorts.
    pub sort_memory_budget: usize,
    /// Directory for temporary files, system default if None.
    pub temp_dir: Option<PathBuf>,
}

/// Memory budget of external sorts when nothing else is configured.
pub const DEFAULT_SORT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

impl Default for AssemblyOptions {
    fn default() -> Self {
        AssemblyOptions { chunk_size: 4096, sort_memory_budget: DEFAULT_SORT_MEMORY_BUDGET, temp_dir: None }
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn from_toml_fills_defaults() {
        use super::AssemblerParameters;

        let contents = "bad_quality_threshold = 15\nseparate_by_c = true\n\n[pre_clustering]\nmaximal_ratio = 0.5\n\n[clustering]\ndepth = 3\n";
        let got = AssemblerParameters::from_toml(contents).unwrap();

        assert_eq!(got.bad_quality_threshold, 15);
        assert!(got.separate_by_c);
        assert_eq!(got.pre_clustering.maximal_ratio, 0.5);
        assert_eq!(got.pre_clustering.score_filtering_ratio, 3.0);
        assert_eq!(got.clustering.as_ref().unwrap().depth, 3);
        assert_eq!(got.clustering.as_ref().unwrap().specific_mutation_probability, 1e-3);
        assert_eq!(got.minimal_clonal_sequence_length, 12);
    }

    #[test]
    fn mapping_enabled() {
        use super::AssemblerParameters;

        let mut params = AssemblerParameters::default();
        assert!(params.mapping_enabled());
        params.max_bad_points_percent = 0.0;
        assert!(!params.mapping_enabled());
    }
}
