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

//! clna is a library and a command-line client for:
//!
//!   - Assembling immune repertoire alignments into clonotypes.
//!   - Storing the clonotypes together with their alignments in an indexed,
//!     block compressed .clna file.
//!   - Building a standalone index from alignments to clones.
//!
//! Reads are grouped by their clonal sequence (the nucleotides of the
//! assembling features) and by the genes they align to. Reads with a few low
//! quality bases are mapped onto the clonotypes afterwards, and clonotypes
//! that look like PCR or sequencing errors of a bigger one are merged into
//! it.
//!
//! ## Usage
//!
//! ### Command line
//!
//! The clna CLI supports the following subcommands:
//!   - `clna assemble` assemble a .vdjca file into a .clna file.
//!   - `clna index` build the alignment to clone index of a .clna file.
//!   - `clna info` print the counts and the assembly report of a .clna file.
//!
//! Assembler parameters are read from a TOML file with `--params`, see
//! [AssemblerParameters](params::AssemblerParameters) for the fields.
//!
//! ### Rust API
//!
//! [assemble_to_clna] runs the whole pipeline. The passes can also be driven
//! one at a time through [CloneAssembler](assembler::CloneAssembler), see
//! [assembler] for the order. The file formats are read and written with:
//!
//!   - [VdjcaReader](vdjca::VdjcaReader) and [VdjcaWriter](vdjca::VdjcaWriter) for alignments.
//!   - [ClnaReader](clna::reader::ClnaReader) and [ClnaWriter](clna::writer::ClnaWriter) for clones and their alignments.
//!   - [MappingIndex](mapping::index::MappingIndex) and [write_index](mapping::index::write_index) for the standalone index.
//!

pub mod alignment;
pub mod assembler;
pub mod clna;
pub mod clonotype;
pub mod collate;
pub mod compression;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod events;
pub mod genes;
pub mod headers;
pub mod mapping;
pub mod params;
pub mod sequence;
pub mod tags;
pub mod tree;
pub mod vdjca;

pub use error::Error;
pub use error::Result;

use alignment::PreClone;
use assembler::CloneAssembler;
use assembler::builder::AggregatedHits;
use assembler::report::AssemblerReport;
use assembler::report::AssemblerSummary;
use clna::writer::ClnaWriter;
use events::DeferredFilter;
use events::REORDER_BUFFER_SIZE;
use headers::file::ClnaHeader;
use headers::file::version_string;
use params::AssemblerParameters;
use params::AssemblyOptions;
use vdjca::AlignmentSource;
use vdjca::Alignments;

use std::io::Write;

use log::info;
use rayon::prelude::*;

/// Pre-clones of an alignment stream, numbered by position.
fn pre_clones(alignments: Alignments<'_>) -> impl Iterator<Item = Result<PreClone>> + '_ {
    alignments.enumerate().map(|(idx, alignment)| {
        let mut pre_clone = PreClone::from_alignment(&alignment?);
        pre_clone.index = idx as u64;
        Ok(pre_clone)
    })
}

/// Runs `f` over `input` in parallel, `chunk_size` items at a time.
///
/// Returns the number of items.
fn for_each_chunk<T, I, F>(
    input: I,
    chunk_size: usize,
    f: F,
) -> Result<u64>
where
    T: Send + Sync,
    I: Iterator<Item = Result<T>>,
    F: Fn(&T) -> Result<()> + Sync,
{
    let mut count: u64 = 0;
    let mut chunk: Vec<T> = Vec::with_capacity(chunk_size);
    for item in input {
        chunk.push(item?);
        if chunk.len() >= chunk_size {
            chunk.par_iter().try_for_each(&f)?;
            count += chunk.len() as u64;
            chunk.clear();
        }
    }
    chunk.par_iter().try_for_each(&f)?;
    count += chunk.len() as u64;
    Ok(count)
}

/// Assemble the alignments in `source` and write a .clna file to `conn`.
///
/// Reads `source` three times: for the initial assembly, for mapping the
/// deferred reads and for writing the alignments. Work inside each pass runs
/// on the current rayon thread pool.
///
/// Returns the assembly report that is also stored in the file.
///
/// ## Usage
///
/// ```rust
/// use clna::alignment::VdjcAlignment;
/// use clna::assemble_to_clna;
/// use clna::clna::reader::ClnaReader;
/// use clna::genes::{GeneHit, GeneHits, GeneType};
/// use clna::params::{AssemblerParameters, AssemblyOptions};
/// use clna::sequence::SequenceWithQuality;
/// use std::io::Cursor;
///
/// let hits = GeneHits::new()
///     .with(GeneType::Variable, vec![GeneHit::new("TRBV12", 300.0)])
///     .with(GeneType::Joining, vec![GeneHit::new("TRBJ2-7", 120.0)]);
/// let cdr3 = SequenceWithQuality::with_uniform_quality(b"TGTGCCAGCAGTTTA", 35);
/// let alignments: Vec<VdjcAlignment> = (0..20).map(|x| VdjcAlignment::new(x, x, hits.clone(), vec![Some(cdr3.clone())])).collect();
///
/// let mut bytes: Vec<u8> = Vec::new();
/// let report = assemble_to_clna(&alignments, &AssemblerParameters::default(), &AssemblyOptions::default(), &mut bytes).unwrap();
/// assert_eq!(report.final_clones, 1);
///
/// let mut reader = ClnaReader::new(Cursor::new(bytes)).unwrap();
/// assert_eq!(reader.alignments_of(0).unwrap().len(), 20);
/// ```
///
pub fn assemble_to_clna<S, W>(
    source: &S,
    params: &AssemblerParameters,
    options: &AssemblyOptions,
    conn: W,
) -> Result<AssemblerSummary>
where
    S: AlignmentSource + ?Sized,
    W: Write,
{
    let chunk_size = options.chunk_size.clamp(1, REORDER_BUFFER_SIZE);
    let report = AssemblerReport::new();

    let assembler = CloneAssembler::new(params, &report, options.temp_dir.as_deref())?;
    let total = for_each_chunk(pre_clones(source.open()?), chunk_size, |pre_clone| {
        assembler.initial_assembly(pre_clone)
    })?;
    let mut assembled = assembler.end_initial_assembly(total)?;

    let deferred_log = match assembled.mapper()? {
        Some(mapper) => {
            let deferred = DeferredFilter::new(pre_clones(source.open()?), assembled.initial_log().reader()?);
            for_each_chunk(deferred, chunk_size, |(ordinal, pre_clone)| mapper.map(*ordinal, pre_clone))?;
            Some(mapper.finish()?)
        },
        None => None,
    };
    if let Some(log) = deferred_log {
        assembled.set_deferred_log(log)?;
    }

    let result = assembled.build(&AggregatedHits)?;
    let header = ClnaHeader { version: version_string(), parameters: params.clone(), ordering: result.clones.ordering() };
    let mut writer = ClnaWriter::new(conn, options);
    writer.write_clones(&header, &result.clones)?;
    writer.write_alignments(result.assigned(source.open()?)?)?;

    let summary = report.summary(total, result.clones.len() as u64);
    writer.finish(&summary)?;
    info!("Assembled {} reads into {} clonotypes", total, result.clones.len());

    Ok(summary)
}

// Tests
#[cfg(test)]
mod tests {
    use crate::alignment::VdjcAlignment;
    use crate::genes::{GeneHit, GeneHits, GeneType};
    use crate::sequence::SequenceWithQuality;

    fn alignment(index: u64, v: &str, j: &str, seq: &[u8], qual: &[u8]) -> VdjcAlignment {
        let hits = GeneHits::new()
            .with(GeneType::Variable, vec![GeneHit::new(v, 250.0)])
            .with(GeneType::Joining, vec![GeneHit::new(j, 80.0)]);
        VdjcAlignment::new(index, 5000 + index, hits, vec![Some(SequenceWithQuality::new(seq, qual))])
    }

    // 600, 300 and 50 reads over three signatures, plus 50 copies of the
    // biggest clone with one low quality base
    fn repertoire() -> Vec<VdjcAlignment> {
        let good = [35_u8; 15];
        let mut low = [35_u8; 15];
        low[8] = 5;
        let mut out: Vec<VdjcAlignment> = Vec::new();
        for idx in 0..1000_u64 {
            let aln = match idx % 20 {
                0..=11 => alignment(idx, "TRBV12-3", "TRBJ2-7", b"TGTGCCAGCAGTTTA", &good),
                12..=17 => alignment(idx, "TRBV5-1", "TRBJ1-2", b"TGTGCTTGGAGAGAC", &good),
                18 => alignment(idx, "TRBV20-1", "TRBJ2-1", b"TGCAGTGCTCCCGGG", &good),
                _ => alignment(idx, "TRBV12-3", "TRBJ2-7", b"TGTGCCAGAAGTTTA", &low),
            };
            out.push(aln);
        }
        out
    }

    #[test]
    fn chunks_cover_the_input() {
        use super::for_each_chunk;
        use std::sync::atomic::{AtomicU64, Ordering};

        let sum = AtomicU64::new(0);
        let count = for_each_chunk((1..=10_u64).map(Ok), 3, |x| {
            sum.fetch_add(*x, Ordering::Relaxed);
            Ok(())
        }).unwrap();
        assert_eq!(count, 10);
        assert_eq!(sum.into_inner(), 55);
    }

    #[test]
    fn end_to_end() {
        use super::assemble_to_clna;
        use crate::clna::reader::ClnaReader;
        use crate::mapping::MappingType;
        use crate::mapping::index::{MappingIndex, write_index_from_clna};
        use crate::params::{AssemblerParameters, AssemblyOptions};
        use crate::vdjca::{VdjcaFile, VdjcaWriter};
        use std::fs::File;
        use std::io::BufWriter;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.vdjca");
        let mut writer = VdjcaWriter::create(&input).unwrap();
        repertoire().iter().for_each(|x| writer.write(x).unwrap());
        assert_eq!(writer.finish().unwrap(), 1000);

        let options = AssemblyOptions { chunk_size: 64, sort_memory_budget: 64 * 1024, temp_dir: Some(dir.path().to_path_buf()) };
        let output = dir.path().join("clones.clna");
        let summary = assemble_to_clna(&VdjcaFile::new(&input), &AssemblerParameters::default(), &options, BufWriter::new(File::create(&output).unwrap())).unwrap();
        assert_eq!(summary.total_reads, 1000);
        assert_eq!(summary.deferred, 50);
        assert_eq!(summary.deferred_mapped, 50);
        assert_eq!(summary.final_clones, 3);

        let mut reader = ClnaReader::open(&output).unwrap();
        let clones = reader.clones().unwrap();
        let counts: Vec<u64> = clones.iter().map(|x| x.count).collect();
        assert_eq!(counts, vec![650, 300, 50]);
        assert_eq!(clones.get(0).unwrap().best_gene(GeneType::Variable), Some("TRBV12-3"));
        assert_eq!(reader.number_of_alignments(), 1000);
        assert_eq!((0..3).map(|x| reader.alignment_count(x)).sum::<u64>(), 1000);
        assert!(reader.alignments_of(-1).unwrap().is_empty());

        let biggest = reader.alignments_of(0).unwrap();
        assert_eq!(biggest.iter().filter(|x| x.mapping_type == MappingType::Mapped).count(), 50);
        assert!(biggest.windows(2).all(|x| x[0].alignments_index < x[1].alignments_index));

        let mut bytes: Vec<u8> = Vec::new();
        assert_eq!(write_index_from_clna(&mut reader, &mut bytes, &options).unwrap(), 1000);
        let mut index = MappingIndex::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(index.of_clone(2).unwrap().len(), 50);
        let record = index.by_alignment(19).unwrap().unwrap();
        assert_eq!((record.read_id, record.clone_index, record.mapping_type), (5019, 0, MappingType::Mapped));
    }

    #[test]
    fn one_clonal_sequence_three_signatures() {
        use super::assemble_to_clna;
        use crate::clna::reader::ClnaReader;
        use crate::mapping::MappingType;
        use crate::params::{AssemblerParameters, AssemblyOptions};

        let good = [35_u8; 5];
        let mut low = [35_u8; 5];
        low[2] = 5;
        let input: Vec<VdjcAlignment> = (0..1000_u64).map(|idx| match idx % 20 {
            0..=11 => alignment(idx, "TRBV12-3", "TRBJ2-7", b"CCAAA", &good),
            12..=17 => alignment(idx, "TRBV5-1", "TRBJ1-2", b"CCAAA", &good),
            18 => alignment(idx, "TRBV20-1", "TRBJ2-1", b"CCAAA", &good),
            _ => alignment(idx, "TRBV12-3", "TRBJ2-7", b"CCAAA", &low),
        }).collect();

        let params = AssemblerParameters { minimal_clonal_sequence_length: 5, ..AssemblerParameters::default() };
        let options = AssemblyOptions { chunk_size: 50, ..AssemblyOptions::default() };
        let mut bytes: Vec<u8> = Vec::new();
        let summary = assemble_to_clna(&input, &params, &options, &mut bytes).unwrap();
        assert_eq!(summary.deferred, 50);
        assert_eq!(summary.deferred_mapped, 50);
        assert_eq!(summary.final_clones, 3);

        let mut reader = ClnaReader::new(std::io::Cursor::new(bytes)).unwrap();
        let clones = reader.clones().unwrap();
        let got: Vec<(u64, Option<&str>)> = clones.iter().map(|x| (x.count, x.best_gene(GeneType::Variable))).collect();
        assert_eq!(got, vec![(650, Some("TRBV12-3")), (300, Some("TRBV5-1")), (50, Some("TRBV20-1"))]);
        assert_eq!(reader.number_of_alignments(), 1000);

        // Deferred reads match the clonal sequence exactly
        let biggest = reader.alignments_of(0).unwrap();
        assert_eq!(biggest.len(), 650);
        assert!(biggest.iter().all(|x| x.mapping_type == MappingType::Core));
        assert!(biggest.iter().any(|x| x.alignments_index == 19));
        assert_eq!(reader.alignments_of(2).unwrap().len(), 50);
    }

    #[test]
    fn same_result_on_any_thread_count() {
        use super::assemble_to_clna;
        use crate::params::{AssemblerParameters, AssemblyOptions};

        let input = repertoire();
        let run = |threads: usize| -> Vec<u8> {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            let options = AssemblyOptions { chunk_size: 100, ..AssemblyOptions::default() };
            let mut bytes: Vec<u8> = Vec::new();
            pool.install(|| {
                assemble_to_clna(&input, &AssemblerParameters::default(), &options, &mut bytes).unwrap();
            });
            bytes
        };
        assert_eq!(run(1), run(4));
    }
}
