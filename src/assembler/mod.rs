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

//! Assembly of reads into clonotypes.
//!
//! The assembly runs in passes:
//!
//!   1. [CloneAssembler::initial_assembly] groups good quality reads by clonal
//!      sequence and gene signature, defers reads with a few low quality bases
//!      and drops the rest. Every read gets an event in the initial log.
//!   2. [AssembledClones::mapper] maps the deferred reads onto the clonotypes
//!      of the first pass. Every deferred read gets an event in the deferred log.
//!   3. [AssembledClones::build] pre-clusters, filters and clusters the
//!      clonotypes and numbers the survivors.
//!   4. [AssemblyResult::assigned] replays both logs over the input to tell
//!      which clone each alignment ended up in.
//!
//! Passes 1 and 2 may be driven from any number of threads.
//!
//! ## Usage
//!
//! ```rust
//! use clna::alignment::PreClone;
//! use clna::assembler::CloneAssembler;
//! use clna::assembler::builder::AggregatedHits;
//! use clna::assembler::report::NoopListener;
//! use clna::genes::{GeneHit, GeneHits, GeneType};
//! use clna::params::AssemblerParameters;
//! use clna::sequence::{ClonalSequence, SequenceWithQuality};
//! use clna::tags::TagCount;
//!
//! let params = AssemblerParameters::default();
//! let hits = GeneHits::new()
//!     .with(GeneType::Variable, vec![GeneHit::new("TRBV12", 300.0)])
//!     .with(GeneType::Joining, vec![GeneHit::new("TRBJ2-7", 120.0)]);
//! let sequence = ClonalSequence::new(vec![SequenceWithQuality::with_uniform_quality(b"TGTGCCAGCAGTTTA", 35)]);
//!
//! let assembler = CloneAssembler::new(&params, &NoopListener, None).unwrap();
//! for index in 0..10 {
//!     let read = PreClone { index, hits: hits.clone(), clonal_sequence: Some(sequence.clone()), n_regions: Vec::new(), tags: TagCount::new(), number_of_reads: 1 };
//!     assembler.initial_assembly(&read).unwrap();
//! }
//! let assembled = assembler.end_initial_assembly(10).unwrap();
//! let result = assembled.build(&AggregatedHits).unwrap();
//!
//! assert_eq!(result.clones.len(), 1);
//! assert_eq!(result.clones.get(0).unwrap().count, 10);
//! ```
//!
pub mod accumulator;
pub mod builder;
pub mod clustering;
pub mod container;
pub mod gene_accumulator;
pub mod mapping;
pub mod report;

use crate::alignment::PreClone;
use crate::alignment::VdjcAlignment;
use crate::assembler::builder::CloneBuilder;
use crate::assembler::builder::CloneIndexMapping;
use crate::assembler::builder::GeneAligner;
use crate::assembler::container::CloneAccumulatorContainer;
use crate::assembler::container::ContainerBuild;
use crate::assembler::mapping::DeferredMapper;
use crate::assembler::report::AssemblerListener;
use crate::clonotype::ClonotypeSet;
use crate::error::Error;
use crate::error::Result;
use crate::events::AssemblerEvent;
use crate::events::EventKind;
use crate::events::EventLog;
use crate::events::EventLogger;
use crate::events::EventReader;
use crate::genes::GeneSignature;
use crate::mapping::MappingType;
use crate::params::AssemblerParameters;
use crate::sequence::ClonalSequence;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use log::info;
use parking_lot::Mutex;
use parking_lot::RwLock;
use rayon::prelude::*;

/// First pass of the assembly. Shared between worker threads.
pub struct CloneAssembler<'a> {
    params: &'a AssemblerParameters,
    listener: &'a dyn AssemblerListener,
    containers: RwLock<HashMap<ClonalSequence, Mutex<CloneAccumulatorContainer>>>,
    next_index: AtomicI64,
    events: EventLogger,
    deferred: AtomicU64,
    temp_dir: Option<PathBuf>,
}

impl<'a> CloneAssembler<'a> {
    pub fn new(
        params: &'a AssemblerParameters,
        listener: &'a dyn AssemblerListener,
        temp_dir: Option<&Path>,
    ) -> Result<Self> {
        Ok(CloneAssembler {
            params, listener,
            containers: RwLock::new(HashMap::new()),
            next_index: AtomicI64::new(0),
            events: EventLogger::new(temp_dir)?,
            deferred: AtomicU64::new(0),
            temp_dir: temp_dir.map(|x| x.to_path_buf()),
        })
    }

    fn accumulate(&self, pre_clone: &PreClone, clonal_sequence: &ClonalSequence) -> Result<i64> {
        let signature = GeneSignature::from_hits(&pre_clone.hits, self.params.separate());
        loop {
            {
                let containers = self.containers.read();
                if let Some(container) = containers.get(clonal_sequence) {
                    return container.lock().accumulate(pre_clone, signature, self.params, &self.next_index, self.listener);
                }
            }
            self.containers.write().entry(clonal_sequence.clone()).or_default();
        }
    }

    fn assemble(&self, pre_clone: &PreClone) -> Result<EventKind> {
        let Some(clonal_sequence) = pre_clone.clonal_sequence.as_ref() else {
            self.listener.on_no_clonal_sequence(pre_clone);
            return Ok(EventKind::Dropped);
        };
        if clonal_sequence.len() < self.params.minimal_clonal_sequence_length {
            self.listener.on_too_short_clonal_sequence(pre_clone);
            return Ok(EventKind::Dropped);
        }
        if self.params.mapping_enabled() {
            let bad_points = clonal_sequence.bad_points(self.params.bad_quality_threshold).len();
            if bad_points as f64 > clonal_sequence.len() as f64 * self.params.max_bad_points_percent {
                self.listener.on_too_many_low_quality_points(pre_clone);
                return Ok(EventKind::Dropped);
            }
            if bad_points > 0 {
                self.listener.on_deferred(pre_clone);
                self.deferred.fetch_add(1, Ordering::Relaxed);
                return Ok(EventKind::Deferred);
            }
        }
        let index = self.accumulate(pre_clone, clonal_sequence)?;
        self.listener.on_core_read(pre_clone);
        Ok(EventKind::Assigned(index))
    }

    /// Adds one read. `pre_clone.index` must run over `0..n` across all calls.
    pub fn initial_assembly(&self, pre_clone: &PreClone) -> Result<()> {
        let kind = self.assemble(pre_clone)?;
        self.events.log(AssemblerEvent::new(pre_clone.index, kind))
    }

    /// Closes the first pass after `total` reads.
    pub fn end_initial_assembly(self, total: u64) -> Result<AssembledClones<'a>> {
        let initial_log = self.events.end(total)?;
        let mut containers: Vec<(ClonalSequence, CloneAccumulatorContainer)> = self.containers.into_inner()
            .into_iter()
            .map(|(k, v)| (k, v.into_inner()))
            .collect();
        containers.sort_by_key(|(k, _)| k.nucleotides());
        let containers: Vec<Mutex<CloneAccumulatorContainer>> = containers.into_iter().map(|(_, v)| Mutex::new(v)).collect();

        let deferred = self.deferred.into_inner();
        info!("Initial assembly: {} clonotypes from {} reads, {} reads deferred", self.next_index.into_inner(), total, deferred);

        Ok(AssembledClones {
            params: self.params,
            listener: self.listener,
            containers, initial_log, deferred, total,
            deferred_log: None,
            temp_dir: self.temp_dir,
        })
    }
}

/// Clonotypes of the first pass, before building.
pub struct AssembledClones<'a> {
    params: &'a AssemblerParameters,
    listener: &'a dyn AssemblerListener,
    containers: Vec<Mutex<CloneAccumulatorContainer>>,
    initial_log: EventLog,
    deferred_log: Option<EventLog>,
    deferred: u64,
    total: u64,
    temp_dir: Option<PathBuf>,
}

impl<'a> AssembledClones<'a> {
    pub fn initial_log(&self) -> &EventLog {
        &self.initial_log
    }

    /// Number of reads left for the mapping pass.
    pub fn deferred_count(&self) -> u64 {
        self.deferred
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clone_count(&self) -> usize {
        self.containers.iter().map(|x| x.lock().len()).sum()
    }

    /// Mapper for the deferred reads, None when no read was deferred.
    pub fn mapper(&self) -> Result<Option<DeferredMapper<'_>>> {
        if self.deferred == 0 || !self.params.mapping_enabled() {
            return Ok(None)
        }
        let mapper = DeferredMapper::new(self.params, self.listener, &self.containers, self.deferred, self.temp_dir.as_deref())?;
        Ok(Some(mapper))
    }

    /// Stores the log produced by the mapper.
    pub fn set_deferred_log(&mut self, log: EventLog) -> Result<()> {
        if log.len() != self.deferred {
            return Err(Error::EventCount { expected: self.deferred, written: log.len() });
        }
        info!("Mapped {} deferred reads", log.len());
        self.deferred_log = Some(log);
        Ok(())
    }

    /// Pre-clusters, filters, clusters and numbers the clonotypes.
    pub fn build(self, aligner: &dyn GeneAligner) -> Result<AssemblyResult> {
        if self.deferred > 0 && self.params.mapping_enabled() && self.deferred_log.is_none() {
            return Err(Error::protocol("clonotypes built before the deferred reads were mapped"));
        }
        let params = self.params;
        let listener = self.listener;
        let built: Vec<ContainerBuild> = self.containers.into_par_iter()
            .map(|x| x.into_inner().build(params, listener))
            .collect::<Result<Vec<ContainerBuild>>>()?;

        let mut mapping = CloneIndexMapping::new();
        let mut survivors = Vec::new();
        for container in built.into_iter() {
            container.pre_clustered.iter().for_each(|(minor, major)| mapping.add_pre_clustered(*minor, *major));
            container.dropped.iter().for_each(|x| mapping.add_dropped(*x));
            survivors.extend(container.survivors);
        }
        info!("{} clonotypes left after pre-clustering and filtering", survivors.len());

        let survivors = match params.clustering.as_ref() {
            Some(clustering) => {
                let outcome = clustering::cluster(survivors, clustering, clustering.add_reads_count_on_clustering, listener);
                outcome.clustered.iter().for_each(|(minor, head)| mapping.add_clustered(*minor, *head));
                outcome.heads
            },
            None => survivors,
        };

        let builder = CloneBuilder::new(params, aligner, listener);
        let clones = builder.build(survivors, &mut mapping);

        Ok(AssemblyResult {
            clones, mapping,
            initial_log: self.initial_log,
            deferred_log: self.deferred_log,
            total: self.total,
        })
    }
}

/// Final clonotypes with everything needed to place each read.
pub struct AssemblyResult {
    pub clones: ClonotypeSet,
    pub mapping: CloneIndexMapping,
    initial_log: EventLog,
    deferred_log: Option<EventLog>,
    total: u64,
}

impl AssemblyResult {
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Stamps the alignments of a fresh pass over the input with their final
    /// clone and mapping type.
    pub fn assigned<I>(&self, alignments: I) -> Result<AssignedAlignments<'_, I>>
    where I: Iterator<Item = Result<VdjcAlignment>> {
        let deferred = match self.deferred_log.as_ref() {
            Some(log) => Some(log.reader()?),
            None => None,
        };
        Ok(AssignedAlignments { input: alignments, initial: self.initial_log.reader()?, deferred, mapping: &self.mapping })
    }
}

/// Replays the event logs in lockstep with the input.
pub struct AssignedAlignments<'a, I> {
    input: I,
    initial: EventReader,
    deferred: Option<EventReader>,
    mapping: &'a CloneIndexMapping,
}

impl<I: Iterator<Item = Result<VdjcAlignment>>> AssignedAlignments<'_, I> {
    fn next_event(reader: Option<&mut EventReader>, what: &str) -> Result<AssemblerEvent> {
        match reader.and_then(|x| x.next()) {
            Some(event) => event,
            None => Err(Error::corrupted(format!("{} event log ended before the input", what))),
        }
    }

    fn place(&mut self, alignment: &mut VdjcAlignment) -> Result<()> {
        let event = Self::next_event(Some(&mut self.initial), "initial")?;
        let kind = match event.kind {
            EventKind::Deferred => Self::next_event(self.deferred.as_mut(), "deferred")?.kind,
            kind => kind,
        };
        let (clone_index, mapping_type) = match kind {
            EventKind::Assigned(clone) => self.mapping.resolve(clone, false),
            EventKind::Mapped(clone) => self.mapping.resolve(clone, true),
            EventKind::Dropped => (-1, MappingType::Dropped),
            EventKind::Deferred => return Err(Error::corrupted(format!("read {} deferred twice", event.index))),
        };
        alignment.clone_index = clone_index;
        alignment.mapping_type = mapping_type;
        Ok(())
    }
}

impl<I: Iterator<Item = Result<VdjcAlignment>>> Iterator for AssignedAlignments<'_, I> {
    type Item = Result<VdjcAlignment>;

    fn next(&mut self) -> Option<Result<VdjcAlignment>> {
        let mut alignment = match self.input.next()? {
            Ok(alignment) => alignment,
            Err(e) => return Some(Err(e)),
        };
        Some(self.place(&mut alignment).map(|_| alignment))
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

    #[test]
    fn initial_assembly_sorts_reads() {
        use super::CloneAssembler;
        use crate::assembler::report::AssemblerReport;
        use crate::events::EventKind;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters { minimal_clonal_sequence_length: 6, ..AssemblerParameters::default() };
        let report = AssemblerReport::new();
        let assembler = CloneAssembler::new(&params, &report, None).unwrap();
        let mut no_sequence = read(4, b"CCAAAT", &[30; 6], "V1");
        no_sequence.clonal_sequence = None;

        assembler.initial_assembly(&read(0, b"CCAAAT", &[30; 6], "V1")).unwrap();
        assembler.initial_assembly(&read(2, b"CCA", &[30; 3], "V1")).unwrap();
        assembler.initial_assembly(&read(1, b"CCAAAT", &[30, 30, 2, 30, 30, 30], "V1")).unwrap();
        assembler.initial_assembly(&read(3, b"CCAAAT", &[2; 6], "V1")).unwrap();
        assembler.initial_assembly(&no_sequence).unwrap();
        assembler.initial_assembly(&read(5, b"CCAAAT", &[30; 6], "V2")).unwrap();
        let assembled = assembler.end_initial_assembly(6).unwrap();

        let got: Vec<EventKind> = assembled.initial_log().reader().unwrap().map(|x| x.unwrap().kind).collect();
        assert_eq!(got, vec![EventKind::Assigned(0), EventKind::Deferred, EventKind::Dropped, EventKind::Dropped, EventKind::Dropped, EventKind::Assigned(1)]);
        assert_eq!(assembled.deferred_count(), 1);
        assert_eq!(assembled.clone_count(), 2);

        let summary = report.summary(6, 0);
        assert_eq!(summary.core_reads, 2);
        assert_eq!(summary.too_short_clonal_sequence, 1);
        assert_eq!(summary.too_many_low_quality_points, 1);
        assert_eq!(summary.no_clonal_sequence, 1);
    }

    #[test]
    fn nothing_is_deferred_without_mapping() {
        use super::CloneAssembler;
        use crate::assembler::report::NoopListener;
        use crate::events::EventKind;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters { minimal_clonal_sequence_length: 6, bad_quality_threshold: 0, ..AssemblerParameters::default() };
        let assembler = CloneAssembler::new(&params, &NoopListener, None).unwrap();
        assembler.initial_assembly(&read(0, b"CCAAAT", &[2; 6], "V1")).unwrap();
        let assembled = assembler.end_initial_assembly(1).unwrap();

        let got: Vec<EventKind> = assembled.initial_log().reader().unwrap().map(|x| x.unwrap().kind).collect();
        assert_eq!(got, vec![EventKind::Assigned(0)]);
        assert!(assembled.mapper().unwrap().is_none());
    }

    #[test]
    fn building_before_mapping_is_refused() {
        use super::CloneAssembler;
        use crate::assembler::builder::AggregatedHits;
        use crate::assembler::report::NoopListener;
        use crate::error::Error;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters { minimal_clonal_sequence_length: 6, ..AssemblerParameters::default() };
        let assembler = CloneAssembler::new(&params, &NoopListener, None).unwrap();
        assembler.initial_assembly(&read(0, b"CCAAAT", &[30; 6], "V1")).unwrap();
        assembler.initial_assembly(&read(1, b"CCAAAT", &[30, 2, 30, 30, 30, 30], "V1")).unwrap();
        let assembled = assembler.end_initial_assembly(2).unwrap();

        assert!(matches!(assembled.build(&AggregatedHits), Err(Error::Protocol(_))));
    }

    #[test]
    fn all_passes_place_every_read() {
        use super::CloneAssembler;
        use crate::alignment::VdjcAlignment;
        use crate::assembler::builder::AggregatedHits;
        use crate::assembler::report::NoopListener;
        use crate::events::DeferredFilter;
        use crate::mapping::MappingType;
        use crate::params::AssemblerParameters;

        let params = AssemblerParameters { minimal_clonal_sequence_length: 6, ..AssemblerParameters::default() };
        let reads = vec![
            read(0, b"CCAAAT", &[30; 6], "V1"),
            read(1, b"GGGTTT", &[30; 6], "V2"),
            read(2, b"CCTAAT", &[30, 30, 2, 30, 30, 30], "V1"),
            read(3, b"CCAAAT", &[30; 6], "V1"),
            read(4, b"AAAAAA", &[30, 2, 30, 30, 30, 30], "V1"),
            read(5, b"CCA", &[30; 3], "V1"),
        ];

        let assembler = CloneAssembler::new(&params, &NoopListener, None).unwrap();
        reads.iter().for_each(|x| assembler.initial_assembly(x).unwrap());
        let mut assembled = assembler.end_initial_assembly(reads.len() as u64).unwrap();

        let log = {
            let mapper = assembled.mapper().unwrap().unwrap();
            let input = reads.clone().into_iter().map(Ok);
            for deferred in DeferredFilter::new(input, assembled.initial_log().reader().unwrap()) {
                let (ordinal, pre_clone) = deferred.unwrap();
                mapper.map(ordinal, &pre_clone).unwrap();
            }
            mapper.finish().unwrap()
        };
        assembled.set_deferred_log(log).unwrap();
        let result = assembled.build(&AggregatedHits).unwrap();

        assert_eq!(result.clones.len(), 2);
        assert_eq!(result.clones.get(0).unwrap().count, 3);

        let alignments = reads.iter().map(|x| Ok(VdjcAlignment::new(x.index, x.index, x.hits.clone(), Vec::new())));
        let got: Vec<(i64, MappingType)> = result.assigned(alignments).unwrap().map(|x| x.unwrap()).map(|x| (x.clone_index, x.mapping_type)).collect();
        assert_eq!(got, vec![
            (0, MappingType::Core),
            (1, MappingType::Core),
            (0, MappingType::Mapped),
            (0, MappingType::Core),
            (-1, MappingType::Dropped),
            (-1, MappingType::Dropped),
        ]);
    }
}
