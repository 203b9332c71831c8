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

//! Callbacks for everything the assembler decides, and a report built from them.

use crate::alignment::PreClone;
use crate::assembler::accumulator::CloneAccumulator;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bincode::{Decode, Encode};

/// Receives assembler decisions. Called from worker threads.
///
/// All methods do nothing by default.
pub trait AssemblerListener: Sync {
    fn on_new_clone_created(&self, _accumulator: &CloneAccumulator) {}
    fn on_core_read(&self, _pre_clone: &PreClone) {}
    fn on_no_clonal_sequence(&self, _pre_clone: &PreClone) {}
    fn on_too_short_clonal_sequence(&self, _pre_clone: &PreClone) {}
    fn on_too_many_low_quality_points(&self, _pre_clone: &PreClone) {}
    fn on_deferred(&self, _pre_clone: &PreClone) {}
    fn on_deferred_mapped(&self, _pre_clone: &PreClone, _mismatches: usize) {}
    fn on_deferred_dropped(&self, _pre_clone: &PreClone) {}
    fn on_pre_clustered(&self, _major: &CloneAccumulator, _minor: &CloneAccumulator) {}
    fn on_dropped_by_score(&self, _accumulator: &CloneAccumulator) {}
    fn on_dropped_by_quality(&self, _accumulator: &CloneAccumulator) {}
    fn on_clustered(&self, _major: &CloneAccumulator, _minor: &CloneAccumulator) {}
    fn on_missing_gene(&self, _accumulator: &CloneAccumulator) {}
}

/// Listener that ignores everything.
pub struct NoopListener;

impl AssemblerListener for NoopListener {}

/// Counts assembler decisions.
#[derive(Debug, Default)]
pub struct AssemblerReport {
    initial_clones: AtomicU64,
    core_reads: AtomicU64,
    no_clonal_sequence: AtomicU64,
    too_short: AtomicU64,
    low_quality: AtomicU64,
    deferred: AtomicU64,
    deferred_mapped: AtomicU64,
    deferred_mapped_reads: AtomicU64,
    deferred_dropped: AtomicU64,
    pre_clustered: AtomicU64,
    dropped_by_score: AtomicU64,
    dropped_by_quality: AtomicU64,
    clustered: AtomicU64,
    clustered_reads: AtomicU64,
    missing_gene: AtomicU64,
}

impl AssemblerReport {
    pub fn new() -> Self {
        AssemblerReport::default()
    }

    pub fn summary(&self, total_reads: u64, final_clones: u64) -> AssemblerSummary {
        let get = |x: &AtomicU64| x.load(Ordering::Relaxed);
        AssemblerSummary {
            total_reads,
            final_clones,
            initial_clones: get(&self.initial_clones),
            core_reads: get(&self.core_reads),
            no_clonal_sequence: get(&self.no_clonal_sequence),
            too_short_clonal_sequence: get(&self.too_short),
            too_many_low_quality_points: get(&self.low_quality),
            deferred: get(&self.deferred),
            deferred_mapped: get(&self.deferred_mapped),
            deferred_dropped: get(&self.deferred_dropped),
            pre_clustered: get(&self.pre_clustered),
            dropped_by_score: get(&self.dropped_by_score),
            dropped_by_quality: get(&self.dropped_by_quality),
            clustered: get(&self.clustered),
            clustered_reads: get(&self.clustered_reads),
            missing_gene: get(&self.missing_gene),
        }
    }
}

fn inc(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl AssemblerListener for AssemblerReport {
    fn on_new_clone_created(&self, _accumulator: &CloneAccumulator) {
        inc(&self.initial_clones, 1);
    }

    fn on_core_read(&self, pre_clone: &PreClone) {
        inc(&self.core_reads, pre_clone.number_of_reads);
    }

    fn on_no_clonal_sequence(&self, pre_clone: &PreClone) {
        inc(&self.no_clonal_sequence, pre_clone.number_of_reads);
    }

    fn on_too_short_clonal_sequence(&self, pre_clone: &PreClone) {
        inc(&self.too_short, pre_clone.number_of_reads);
    }

    fn on_too_many_low_quality_points(&self, pre_clone: &PreClone) {
        inc(&self.low_quality, pre_clone.number_of_reads);
    }

    fn on_deferred(&self, pre_clone: &PreClone) {
        inc(&self.deferred, pre_clone.number_of_reads);
    }

    fn on_deferred_mapped(&self, pre_clone: &PreClone, _mismatches: usize) {
        inc(&self.deferred_mapped, 1);
        inc(&self.deferred_mapped_reads, pre_clone.number_of_reads);
    }

    fn on_deferred_dropped(&self, pre_clone: &PreClone) {
        inc(&self.deferred_dropped, pre_clone.number_of_reads);
    }

    fn on_pre_clustered(&self, _major: &CloneAccumulator, _minor: &CloneAccumulator) {
        inc(&self.pre_clustered, 1);
    }

    fn on_dropped_by_score(&self, _accumulator: &CloneAccumulator) {
        inc(&self.dropped_by_score, 1);
    }

    fn on_dropped_by_quality(&self, _accumulator: &CloneAccumulator) {
        inc(&self.dropped_by_quality, 1);
    }

    fn on_clustered(&self, _major: &CloneAccumulator, minor: &CloneAccumulator) {
        inc(&self.clustered, 1);
        inc(&self.clustered_reads, minor.count());
    }

    fn on_missing_gene(&self, _accumulator: &CloneAccumulator) {
        inc(&self.missing_gene, 1);
    }
}

/// Snapshot of an [AssemblerReport], stored as the footer of .clna files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct AssemblerSummary {
    pub total_reads: u64,
    pub final_clones: u64,
    pub initial_clones: u64,
    pub core_reads: u64,
    pub no_clonal_sequence: u64,
    pub too_short_clonal_sequence: u64,
    pub too_many_low_quality_points: u64,
    pub deferred: u64,
    /// Deferred reads that found a clone, with or without mismatches.
    pub deferred_mapped: u64,
    pub deferred_dropped: u64,
    pub pre_clustered: u64,
    pub dropped_by_score: u64,
    pub dropped_by_quality: u64,
    pub clustered: u64,
    pub clustered_reads: u64,
    pub missing_gene: u64,
}

impl std::fmt::Display for AssemblerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let pct = |x: u64| if self.total_reads == 0 { 0.0 } else { 100.0 * x as f64 / self.total_reads as f64 };
        writeln!(f, "Total reads: {}", self.total_reads)?;
        writeln!(f, "Final clonotypes: {}", self.final_clones)?;
        writeln!(f, "Initial clonotypes: {}", self.initial_clones)?;
        writeln!(f, "Core reads: {} ({:.2}%)", self.core_reads, pct(self.core_reads))?;
        writeln!(f, "Reads without clonal sequence: {} ({:.2}%)", self.no_clonal_sequence, pct(self.no_clonal_sequence))?;
        writeln!(f, "Reads with too short clonal sequence: {} ({:.2}%)", self.too_short_clonal_sequence, pct(self.too_short_clonal_sequence))?;
        writeln!(f, "Reads with too many low quality positions: {} ({:.2}%)", self.too_many_low_quality_points, pct(self.too_many_low_quality_points))?;
        writeln!(f, "Deferred reads: {} ({:.2}%)", self.deferred, pct(self.deferred))?;
        writeln!(f, "  mapped: {}", self.deferred_mapped)?;
        writeln!(f, "  dropped: {}", self.deferred_dropped)?;
        writeln!(f, "Clonotypes pre-clustered: {}", self.pre_clustered)?;
        writeln!(f, "Clonotypes dropped by gene score: {}", self.dropped_by_score)?;
        writeln!(f, "Clonotypes dropped by quality: {}", self.dropped_by_quality)?;
        writeln!(f, "Clonotypes clustered: {} ({} reads)", self.clustered, self.clustered_reads)?;
        write!(f, "Clonotypes without required genes: {}", self.missing_gene)
    }
}
