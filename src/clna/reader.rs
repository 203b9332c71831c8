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
use crate::clonotype::Clonotype;
use crate::clonotype::ClonotypeSet;
use crate::decoder::BlockDecoder;
use crate::decoder::Stop;
use crate::error::Error;
use crate::error::Result;
use crate::headers::file::ClnaHeader;
use crate::headers::file::TRAILER_SIZE;
use crate::headers::file::Trailer;
use crate::headers::file::decode_trailer;
use crate::headers::file::read_clna_header;
use crate::params::AssemblerParameters;

use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use bincode::decode_from_std_read;

/// Random access to a .clna file.
pub struct ClnaReader<R: Read + Seek> {
    conn: R,
    clone_count: u64,
    header: ClnaHeader,
    trailer: Trailer,
    entries: Vec<IndexEntry>,
    footer: AssemblerSummary,
}

impl ClnaReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ClnaReader::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ClnaReader<R> {
    /// Reads the header, the trailer, the footer and the index.
    pub fn new(mut conn: R) -> Result<Self> {
        conn.seek(SeekFrom::Start(0))?;
        let (clone_count, header) = read_clna_header(&mut conn)?;
        let first_clone = conn.stream_position()?;

        let end = conn.seek(SeekFrom::End(0))?;
        if end < first_clone + TRAILER_SIZE as u64 {
            return Err(Error::corrupted("file is too short for a trailer"));
        }
        conn.seek(SeekFrom::Start(end - TRAILER_SIZE as u64))?;
        let mut bytes: Vec<u8> = vec![0; TRAILER_SIZE];
        conn.read_exact(&mut bytes)?;
        let trailer = decode_trailer(&bytes)?;
        if trailer.first_clone != first_clone || trailer.index_begin > trailer.footer || trailer.footer > end {
            return Err(Error::corrupted("trailer offsets do not fit the file"));
        }

        conn.seek(SeekFrom::Start(trailer.footer))?;
        let footer: AssemblerSummary = decode_from_std_read(&mut conn, bincode::config::standard())?;
        conn.seek(SeekFrom::Start(trailer.index_begin))?;
        let index: ClnaIndex = decode_from_std_read(&mut conn, bincode::config::standard())?;
        let entries = index.entries(clone_count)?;
        if entries.iter().any(|x| x.offset < first_clone || x.offset >= trailer.index_begin) {
            return Err(Error::corrupted("index points outside the alignment section"));
        }

        Ok(ClnaReader { conn, clone_count, header, trailer, entries, footer })
    }

    pub fn number_of_clones(&self) -> u64 {
        self.clone_count
    }

    pub fn number_of_alignments(&self) -> u64 {
        self.entries.iter().map(|x| x.count).sum()
    }

    pub fn header(&self) -> &ClnaHeader {
        &self.header
    }

    pub fn parameters(&self) -> &AssemblerParameters {
        &self.header.parameters
    }

    pub fn version(&self) -> &str {
        &self.header.version
    }

    /// The assembly report stored as footer.
    pub fn footer(&self) -> &AssemblerSummary {
        &self.footer
    }

    /// Index entries, the one for clone -1 first if present.
    pub fn index(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn entry(&self, clone_id: i64) -> Option<&IndexEntry> {
        let unassigned = self.entries.first().is_some_and(|x| x.clone_id == -1) as i64;
        usize::try_from(clone_id + unassigned).ok().and_then(|x| self.entries.get(x)).filter(|x| x.clone_id == clone_id)
    }

    /// Number of alignments of `clone_id`, 0 for unknown clones.
    pub fn alignment_count(&self, clone_id: i64) -> u64 {
        self.entry(clone_id).map(|x| x.count).unwrap_or(0)
    }

    /// Clones one at a time.
    pub fn clone_stream(&mut self) -> Result<BlockDecoder<&mut R, Clonotype>> {
        self.conn.seek(SeekFrom::Start(self.trailer.first_clone))?;
        Ok(BlockDecoder::new(&mut self.conn))
    }

    pub fn clones(&mut self) -> Result<ClonotypeSet> {
        let ordering = self.header.ordering;
        let clone_count = self.clone_count;
        let clones = self.clone_stream()?.collect::<Result<Vec<Clonotype>>>()?;
        if clones.len() as u64 != clone_count {
            return Err(Error::corrupted(format!("{} clones stored, header says {}", clones.len(), clone_count)));
        }
        Ok(ClonotypeSet::new(clones, ordering))
    }

    /// Alignments of one clone, -1 for the alignments outside every clone.
    pub fn alignments_of(&mut self, clone_id: i64) -> Result<Vec<VdjcAlignment>> {
        let Some(entry) = self.entry(clone_id).copied() else {
            return Ok(Vec::new())
        };
        self.conn.seek(SeekFrom::Start(entry.offset))?;
        let mut decoder: BlockDecoder<&mut R, VdjcAlignment> = BlockDecoder::new(&mut self.conn);
        let group = decoder.read_group()?;
        if decoder.stop() != Some(Stop::Separator) || group.len() as u64 != entry.count {
            return Err(Error::corrupted(format!("alignment group of clone {} does not match the index", clone_id)));
        }
        Ok(group)
    }

    /// All alignments in clone order, the ones outside every clone first.
    pub fn alignments(&mut self) -> Result<AllAlignments<'_, R>> {
        let groups = self.entries.len();
        if let Some(first) = self.entries.first() {
            self.conn.seek(SeekFrom::Start(first.offset))?;
        }
        Ok(AllAlignments { decoder: BlockDecoder::new(&mut self.conn), groups_left: groups })
    }

    /// Each clone with its alignments.
    pub fn clones_with_alignments(&mut self) -> Result<ClonesWithAlignments<'_, R>> {
        let clones = self.clones()?.into_clones();
        let start = self.entries.iter().find(|x| x.clone_id >= 0).copied();
        if let Some(start) = start {
            self.conn.seek(SeekFrom::Start(start.offset))?;
        }
        let counts: Vec<u64> = self.entries.iter().filter(|x| x.clone_id >= 0).map(|x| x.count).collect();
        Ok(ClonesWithAlignments { clones: clones.into_iter(), counts: counts.into_iter(), decoder: BlockDecoder::new(&mut self.conn) })
    }
}

/// Alignments of every group, crossing separators.
pub struct AllAlignments<'a, R: Read> {
    decoder: BlockDecoder<&'a mut R, VdjcAlignment>,
    groups_left: usize,
}

impl<R: Read> Iterator for AllAlignments<'_, R> {
    type Item = Result<VdjcAlignment>;

    fn next(&mut self) -> Option<Result<VdjcAlignment>> {
        while self.groups_left > 0 {
            if let Some(alignment) = self.decoder.next() {
                if alignment.is_err() {
                    self.groups_left = 0;
                }
                return Some(alignment)
            }
            self.groups_left -= 1;
            if self.decoder.stop() != Some(Stop::Separator) {
                self.groups_left = 0;
                return Some(Err(Error::corrupted("alignment section ended before the last group")))
            }
            self.decoder.resume();
        }
        None
    }
}

pub struct ClonesWithAlignments<'a, R: Read> {
    clones: std::vec::IntoIter<Clonotype>,
    counts: std::vec::IntoIter<u64>,
    decoder: BlockDecoder<&'a mut R, VdjcAlignment>,
}

impl<R: Read> ClonesWithAlignments<'_, R> {
    fn read_next(&mut self, clone: Clonotype) -> Result<(Clonotype, Vec<VdjcAlignment>)> {
        let expected = self.counts.next().ok_or_else(|| Error::corrupted("index has fewer groups than clones"))?;
        let group = self.decoder.read_group()?;
        if self.decoder.stop() != Some(Stop::Separator) || group.len() as u64 != expected {
            return Err(Error::corrupted(format!("alignment group of clone {} does not match the index", clone.id)));
        }
        self.decoder.resume();
        Ok((clone, group))
    }
}

impl<R: Read> Iterator for ClonesWithAlignments<'_, R> {
    type Item = Result<(Clonotype, Vec<VdjcAlignment>)>;

    fn next(&mut self) -> Option<Result<(Clonotype, Vec<VdjcAlignment>)>> {
        let clone = self.clones.next()?;
        Some(self.read_next(clone))
    }
}

// Tests
#[cfg(test)]
mod tests {
    use crate::alignment::VdjcAlignment;
    use crate::clonotype::{CloneOrdering, Clonotype, ClonotypeSet};
    use crate::mapping::MappingType;

    fn clones(n: u64) -> ClonotypeSet {
        use crate::genes::GeneHits;
        use crate::sequence::SequenceWithQuality;
        use crate::tags::TagCount;

        let clones = (0..n).map(|x| Clonotype {
            id: x as i64,
            targets: vec![SequenceWithQuality::with_uniform_quality(&b"ACGTACGT"[..(x as usize % 8) + 1], 30)],
            hits: GeneHits::new(),
            tags: TagCount::new(),
            count: 100 - x,
            group_id: None,
        }).collect();
        ClonotypeSet::new(clones, CloneOrdering::CountThenGenes)
    }

    fn alignments(n: u64, clone_count: i64, with_unassigned: bool) -> Vec<VdjcAlignment> {
        use crate::genes::GeneHits;

        (0..n).map(|x| {
            let mut aln = VdjcAlignment::new(x, 1000 + x, GeneHits::new(), Vec::new());
            // Never points to the last clone
            aln.clone_index = (x % clone_count as u64) as i64 - 1;
            if aln.clone_index < 0 && !with_unassigned {
                aln.clone_index = 0;
            }
            aln.mapping_type = if aln.clone_index < 0 { MappingType::Dropped } else { MappingType::Core };
            aln
        }).collect()
    }

    fn write(clones: &ClonotypeSet, alignments: &[VdjcAlignment], sort_memory_budget: usize) -> Vec<u8> {
        use crate::assembler::report::AssemblerSummary;
        use crate::clna::writer::ClnaWriter;
        use crate::headers::file::{ClnaHeader, version_string};
        use crate::params::{AssemblerParameters, AssemblyOptions};

        let header = ClnaHeader { version: version_string(), parameters: AssemblerParameters::default(), ordering: clones.ordering() };
        let options = AssemblyOptions { sort_memory_budget, ..AssemblyOptions::default() };
        let footer = AssemblerSummary { total_reads: alignments.len() as u64, final_clones: clones.len() as u64, ..AssemblerSummary::default() };
        let mut bytes: Vec<u8> = Vec::new();
        let mut writer = ClnaWriter::new(&mut bytes, &options);
        writer.write_clones(&header, clones).unwrap();
        writer.write_alignments(alignments.iter().cloned().map(Ok)).unwrap();
        writer.finish(&footer).unwrap();
        bytes
    }

    #[test]
    fn clones_and_alignments_round_trip() {
        use super::ClnaReader;
        use std::io::Cursor;

        let clones = clones(5);
        let alignments = alignments(300, 5, true);
        let bytes = write(&clones, &alignments, 4096);

        let mut reader = ClnaReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.number_of_clones(), 5);
        assert_eq!(reader.number_of_alignments(), 300);
        assert_eq!(reader.footer().total_reads, 300);
        assert_eq!(reader.index()[0].clone_id, -1);
        assert_eq!(reader.alignment_count(4), 0);
        assert_eq!(reader.clones().unwrap(), clones);

        for clone_id in -1..5 {
            let expected: Vec<VdjcAlignment> = alignments.iter().filter(|x| x.clone_index == clone_id).cloned().collect();
            assert_eq!(reader.alignments_of(clone_id).unwrap(), expected);
        }
        assert!(reader.alignments_of(5).unwrap().is_empty());

        let all: Vec<VdjcAlignment> = reader.alignments().unwrap().map(|x| x.unwrap()).collect();
        let mut expected = alignments.clone();
        expected.sort_by_key(|x| x.clone_index);
        assert_eq!(all, expected);

        let paired: Vec<(i64, usize)> = reader.clones_with_alignments().unwrap().map(|x| x.unwrap()).map(|(c, a)| (c.id, a.len())).collect();
        let expected: Vec<(i64, usize)> = (0..5).map(|x| (x, alignments.iter().filter(|a| a.clone_index == x).count())).collect();
        assert_eq!(paired, expected);
    }

    #[test]
    fn no_unassigned_group_when_all_assigned() {
        use super::ClnaReader;
        use std::io::Cursor;

        let clones = clones(3);
        let alignments = alignments(50, 3, false);
        assert!(alignments.iter().all(|x| x.clone_index >= 0));
        let bytes = write(&clones, &alignments, 64);

        let mut reader = ClnaReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.index().len(), 3);
        assert!(reader.index().iter().all(|x| x.clone_id >= 0));
        assert!(reader.alignments_of(-1).unwrap().is_empty());
        assert_eq!(reader.alignments().unwrap().count(), 50);
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        use super::ClnaReader;
        use crate::error::Error;
        use crate::headers::block::BLOCK_HEADER_SIZE;
        use std::io::Cursor;

        let clones = clones(2);
        let alignments = alignments(20, 2, true);
        let mut bytes = write(&clones, &alignments, 4096);

        let offset = ClnaReader::new(Cursor::new(bytes.clone())).unwrap().index()[1].offset as usize;
        bytes[offset + BLOCK_HEADER_SIZE] ^= 0xff;

        let mut reader = ClnaReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.alignments_of(0), Err(Error::Corrupted(_))));
    }

    #[test]
    fn truncated_file_is_rejected() {
        use super::ClnaReader;
        use std::io::Cursor;

        let clones = clones(2);
        let alignments = alignments(20, 2, true);
        let mut bytes = write(&clones, &alignments, 4096);
        bytes.truncate(bytes.len() - 1);

        assert!(ClnaReader::new(Cursor::new(bytes)).is_err());
    }
}
