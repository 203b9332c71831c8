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
use crate::alignment::VdjcAlignment;
use crate::assembler::report::AssemblerSummary;
use crate::clna::ClnaIndex;
use crate::clna::IndexEntry;
use crate::clonotype::ClonotypeSet;
use crate::collate::ExternalSorter;
use crate::collate::SortKey;
use crate::encoder::BlockEncoder;
use crate::encoder::CountingWriter;
use crate::encoder::DEFAULT_BLOCK_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::headers::file::ClnaHeader;
use crate::headers::file::Trailer;
use crate::headers::file::encode_trailer;
use crate::headers::file::write_clna_header;
use crate::params::AssemblyOptions;

use std::io::Write;
use std::path::PathBuf;

use bincode::encode_into_std_write;
use log::info;

impl SortKey for VdjcAlignment {
    type Key = i64;

    fn sort_key(&self) -> i64 {
        self.clone_index
    }

    fn heap_size(&self) -> usize {
        VdjcAlignment::heap_size(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Start,
    Clones,
    Alignments,
}

/// Writes a .clna file section by section.
///
/// Call [write_clones](ClnaWriter::write_clones), then
/// [write_alignments](ClnaWriter::write_alignments), then
/// [finish](ClnaWriter::finish).
pub struct ClnaWriter<W: Write> {
    conn: CountingWriter<W>,
    phase: Phase,
    clone_count: u64,
    first_clone: u64,
    entries: Vec<IndexEntry>,
    sort_memory_budget: usize,
    temp_dir: Option<PathBuf>,
}

impl<W: Write> ClnaWriter<W> {
    pub fn new(conn: W, options: &AssemblyOptions) -> Self {
        ClnaWriter {
            conn: CountingWriter::new(conn),
            phase: Phase::Start,
            clone_count: 0,
            first_clone: 0,
            entries: Vec::new(),
            sort_memory_budget: options.sort_memory_budget,
            temp_dir: options.temp_dir.clone(),
        }
    }

    fn expect_phase(&self, phase: Phase, what: &str) -> Result<()> {
        if self.phase != phase {
            return Err(Error::protocol(format!("cannot {} in phase {:?}", what, self.phase)));
        }
        Ok(())
    }

    /// Writes the file header and the clones.
    pub fn write_clones(&mut self, header: &ClnaHeader, clones: &ClonotypeSet) -> Result<()> {
        self.expect_phase(Phase::Start, "write clones")?;
        self.clone_count = clones.len() as u64;
        write_clna_header(&mut self.conn, self.clone_count, header)?;
        self.first_clone = self.conn.position();

        let mut encoder = BlockEncoder::new(&mut self.conn, DEFAULT_BLOCK_SIZE);
        for clone in clones.iter() {
            encoder.write(clone)?;
        }
        encoder.finish()?;
        self.phase = Phase::Clones;
        Ok(())
    }

    /// Sorts the alignments by clone and writes them in groups.
    ///
    /// Alignments keep their input order within a clone. Returns the number
    /// of alignments written.
    pub fn write_alignments<I>(&mut self, alignments: I) -> Result<u64>
    where I: Iterator<Item = Result<VdjcAlignment>> {
        self.expect_phase(Phase::Clones, "write alignments")?;

        let mut sorter: ExternalSorter<VdjcAlignment> = ExternalSorter::new(self.sort_memory_budget, self.temp_dir.as_deref());
        for alignment in alignments {
            let alignment = alignment?;
            if alignment.clone_index < -1 || alignment.clone_index >= self.clone_count as i64 {
                return Err(Error::protocol(format!("alignment {} points to clone {} of {}", alignment.alignments_index, alignment.clone_index, self.clone_count)));
            }
            sorter.push(alignment)?;
        }
        let total = sorter.len();

        let begin = self.conn.position();
        let mut encoder = BlockEncoder::new(&mut self.conn, DEFAULT_BLOCK_SIZE);
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(self.clone_count as usize + 1);
        let mut open: Option<IndexEntry> = None;
        for alignment in sorter.finish()? {
            let alignment = alignment?;
            if open.map(|x| x.clone_id) != Some(alignment.clone_index) {
                if let Some(done) = open.take() {
                    encoder.write_separator()?;
                    entries.push(done);
                }
                // Clones without alignments get empty groups
                let mut next_id = entries.last().map(|x| x.clone_id + 1).unwrap_or(0).max(0);
                while next_id < alignment.clone_index {
                    entries.push(IndexEntry { clone_id: next_id, offset: begin + encoder.bytes_written(), count: 0 });
                    encoder.write_separator()?;
                    next_id += 1;
                }
                open = Some(IndexEntry { clone_id: alignment.clone_index, offset: begin + encoder.bytes_written(), count: 0 });
            }
            encoder.write(&alignment)?;
            if let Some(group) = open.as_mut() {
                group.count += 1;
            }
        }
        if let Some(done) = open.take() {
            encoder.write_separator()?;
            entries.push(done);
        }
        let mut next_id = entries.last().map(|x| x.clone_id + 1).unwrap_or(0).max(0);
        while next_id < self.clone_count as i64 {
            entries.push(IndexEntry { clone_id: next_id, offset: begin + encoder.bytes_written(), count: 0 });
            encoder.write_separator()?;
            next_id += 1;
        }
        encoder.finish()?;

        info!("Wrote {} alignments in {} groups", total, entries.len());
        self.entries = entries;
        self.phase = Phase::Alignments;
        Ok(total)
    }

    /// Writes the index, the footer and the trailer.
    pub fn finish(mut self, footer: &AssemblerSummary) -> Result<W> {
        self.expect_phase(Phase::Alignments, "finish")?;

        let index_begin = self.conn.position();
        encode_into_std_write(ClnaIndex::from_entries(&self.entries), &mut self.conn, bincode::config::standard())?;
        let footer_begin = self.conn.position();
        encode_into_std_write(footer, &mut self.conn, bincode::config::standard())?;
        let trailer = Trailer::new(footer_begin, self.first_clone, index_begin);
        self.conn.write_all(&encode_trailer(&trailer)?)?;
        self.conn.flush()?;

        info!("Wrote {} clones, {} bytes", self.clone_count, self.conn.position());
        Ok(self.conn.into_inner())
    }
}
