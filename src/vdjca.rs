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

//! Reading and writing .vdjca alignment files.
//!
//! The assembler reads its input several times: once for the initial pass,
//! once for the deferred reads and once to write the alignments into the
//! .clna file. [AlignmentSource] is anything that can be opened again.
//!
//! ## Usage
//!
//! ```rust
//! use clna::alignment::VdjcAlignment;
//! use clna::genes::GeneHits;
//! use clna::sequence::SequenceWithQuality;
//! use clna::vdjca::{VdjcaReader, VdjcaWriter};
//!
//! let aln = VdjcAlignment::new(0, 0, GeneHits::new(), vec![Some(SequenceWithQuality::with_uniform_quality(b"TGTGCC", 30))]);
//!
//! let mut bytes: Vec<u8> = Vec::new();
//! let mut writer = VdjcaWriter::new(&mut bytes).unwrap();
//! writer.write(&aln).unwrap();
//! writer.finish().unwrap();
//!
//! let reader = VdjcaReader::new(bytes.as_slice()).unwrap();
//! let got: Vec<VdjcAlignment> = reader.map(|x| x.unwrap()).collect();
//! assert_eq!(got, vec![aln]);
//! ```

use crate::alignment::VdjcAlignment;
use crate::decoder::BlockDecoder;
use crate::encoder::BlockEncoder;
use crate::encoder::DEFAULT_BLOCK_SIZE;
use crate::error::Result;
use crate::headers::file::read_vdjca_header;
use crate::headers::file::write_vdjca_header;

use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

pub type Alignments<'a> = Box<dyn Iterator<Item = Result<VdjcAlignment>> + Send + 'a>;

/// Input that can be read from the start any number of times.
pub trait AlignmentSource: Sync {
    fn open(&self) -> Result<Alignments<'_>>;
}

impl AlignmentSource for Vec<VdjcAlignment> {
    fn open(&self) -> Result<Alignments<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

impl AlignmentSource for [VdjcAlignment] {
    fn open(&self) -> Result<Alignments<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

/// A .vdjca file on disk.
pub struct VdjcaFile {
    path: PathBuf,
}

impl VdjcaFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        VdjcaFile { path: path.as_ref().to_path_buf() }
    }
}

impl AlignmentSource for VdjcaFile {
    fn open(&self) -> Result<Alignments<'_>> {
        let conn = BufReader::new(File::open(&self.path)?);
        Ok(Box::new(VdjcaReader::new(conn)?))
    }
}

pub struct VdjcaWriter<W: Write> {
    encoder: BlockEncoder<W>,
    written: u64,
}

impl<W: Write> VdjcaWriter<W> {
    pub fn new(mut conn: W) -> Result<Self> {
        write_vdjca_header(&mut conn)?;
        Ok(VdjcaWriter { encoder: BlockEncoder::new(conn, DEFAULT_BLOCK_SIZE), written: 0 })
    }

    pub fn write(&mut self, alignment: &VdjcAlignment) -> Result<()> {
        self.encoder.write(alignment)?;
        self.written += 1;
        Ok(())
    }

    /// Returns the number of alignments written.
    pub fn finish(self) -> Result<u64> {
        self.encoder.finish()?;
        Ok(self.written)
    }
}

impl VdjcaWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        VdjcaWriter::new(BufWriter::new(File::create(path)?))
    }
}

pub struct VdjcaReader<R: Read> {
    version: String,
    decoder: BlockDecoder<R, VdjcAlignment>,
}

impl<R: Read> VdjcaReader<R> {
    pub fn new(mut conn: R) -> Result<Self> {
        let version = read_vdjca_header(&mut conn)?;
        Ok(VdjcaReader { version, decoder: BlockDecoder::new(conn) })
    }

    /// Version string of the library that wrote the file.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl<R: Read> Iterator for VdjcaReader<R> {
    type Item = Result<VdjcAlignment>;

    fn next(&mut self) -> Option<Result<VdjcAlignment>> {
        self.decoder.next()
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn file_source_reopens() {
        use super::{AlignmentSource, VdjcaFile, VdjcaWriter};
        use crate::alignment::VdjcAlignment;
        use crate::genes::{GeneHit, GeneHits, GeneType};
        use crate::sequence::SequenceWithQuality;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.vdjca");

        let hits = GeneHits::new().with(GeneType::Joining, vec![GeneHit::new("TRBJ2-7", 80.0)]);
        let alignments: Vec<VdjcAlignment> = (0..2500).map(|idx| {
            VdjcAlignment::new(idx, idx / 2, hits.clone(), vec![Some(SequenceWithQuality::with_uniform_quality(b"TGTGCCAGC", 35))])
        }).collect();

        let mut writer = VdjcaWriter::create(&path).unwrap();
        alignments.iter().for_each(|x| writer.write(x).unwrap());
        assert_eq!(writer.finish().unwrap(), 2500);

        let source = VdjcaFile::new(&path);
        let first: Vec<VdjcAlignment> = source.open().unwrap().map(|x| x.unwrap()).collect();
        let second = source.open().unwrap().count();
        assert_eq!(first, alignments);
        assert_eq!(second, 2500);
    }

    #[test]
    fn rejects_other_files() {
        use super::VdjcaReader;

        let bytes = b"MiXCR.CLNA.V11xxxx".to_vec();
        assert!(VdjcaReader::new(bytes.as_slice()).is_err());
    }
}
