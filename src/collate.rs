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

//! External merge sort for streams that do not fit in memory.
//!
//! Objects are buffered until the memory budget is used up, then sorted and
//! spilled to a temporary file as one run. The sorted output merges all runs
//! with a min-heap. The sort is stable: objects with equal keys come out in
//! the order they were pushed.
//!
//! ## Usage
//!
//! ```rust
//! use clna::collate::{ExternalSorter, SortKey};
//!
//! #[derive(bincode::Encode, bincode::Decode)]
//! struct Record(u64, u32);
//!
//! impl SortKey for Record {
//!     type Key = u32;
//!     fn sort_key(&self) -> u32 { self.1 }
//!     fn heap_size(&self) -> usize { 16 }
//! }
//!
//! // Budget of 32 bytes spills every two records
//! let mut sorter = ExternalSorter::new(32, None);
//! for (idx, key) in [5, 3, 9, 3, 1].iter().enumerate() {
//!     sorter.push(Record(idx as u64, *key)).unwrap();
//! }
//! let sorted: Vec<u64> = sorter.finish().unwrap().map(|x| x.unwrap().0).collect();
//! assert_eq!(sorted, vec![4, 1, 3, 0, 2]);
//! ```
//!

use crate::decoder::BlockDecoder;
use crate::encoder::BlockEncoder;
use crate::encoder::DEFAULT_BLOCK_SIZE;
use crate::error::Result;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use bincode::Decode;
use bincode::Encode;
use log::debug;
use tempfile::NamedTempFile;
use tempfile::TempPath;

/// Key an object is sorted by, plus an estimate of its memory footprint.
pub trait SortKey {
    type Key: Ord;

    fn sort_key(&self) -> Self::Key;

    /// Approximate number of bytes the object holds in memory.
    fn heap_size(&self) -> usize;
}

pub struct ExternalSorter<T> {
    memory_budget: usize,
    temp_dir: Option<PathBuf>,
    buffer: Vec<T>,
    buffered_bytes: usize,
    runs: Vec<TempPath>,
    count: u64,
}

impl<T: SortKey + Encode + Decode<()>> ExternalSorter<T> {
    pub fn new(memory_budget: usize, temp_dir: Option<&Path>) -> Self {
        ExternalSorter {
            memory_budget,
            temp_dir: temp_dir.map(|x| x.to_path_buf()),
            buffer: Vec::new(),
            buffered_bytes: 0,
            runs: Vec::new(),
            count: 0,
        }
    }

    /// Number of objects pushed so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn push(&mut self, object: T) -> Result<()> {
        self.buffered_bytes += object.heap_size();
        self.buffer.push(object);
        self.count += 1;
        if self.buffered_bytes >= self.memory_budget {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(())
        }
        self.buffer.sort_by_key(|x| x.sort_key());
        let file = match self.temp_dir.as_ref() {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        let (file, path) = file.into_parts();
        let mut conn = BufWriter::new(file);
        let mut encoder = BlockEncoder::new(&mut conn, DEFAULT_BLOCK_SIZE);
        for object in self.buffer.drain(..) {
            encoder.write(&object)?;
        }
        encoder.finish()?;
        debug!("Spilled run {} ({} bytes in memory)", self.runs.len(), self.buffered_bytes);
        self.runs.push(path);
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Sorted view of everything pushed.
    pub fn finish(mut self) -> Result<Sorted<T>> {
        if self.runs.is_empty() {
            self.buffer.sort_by_key(|x| x.sort_key());
            return Ok(Sorted::Memory(self.buffer.into_iter()))
        }
        self.spill()?;
        Ok(Sorted::Merge(Merge::new(self.runs)?))
    }
}

/// Output of an [ExternalSorter].
pub enum Sorted<T: SortKey> {
    Memory(std::vec::IntoIter<T>),
    Merge(Merge<T>),
}

impl<T: SortKey + Decode<()>> Iterator for Sorted<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        match self {
            Sorted::Memory(objects) => objects.next().map(Ok),
            Sorted::Merge(merge) => merge.next(),
        }
    }
}

/// K-way merge of sorted runs. The run files are removed when it is dropped.
pub struct Merge<T: SortKey> {
    cursors: Vec<BlockDecoder<BufReader<File>, T>>,
    heads: Vec<Option<T>>,
    heap: BinaryHeap<Reverse<(T::Key, usize)>>,
    failed: bool,
    _runs: Vec<TempPath>,
}

impl<T: SortKey + Decode<()>> Merge<T> {
    fn new(runs: Vec<TempPath>) -> Result<Self> {
        let mut merge = Merge {
            cursors: Vec::with_capacity(runs.len()),
            heads: Vec::with_capacity(runs.len()),
            heap: BinaryHeap::new(),
            failed: false,
            _runs: Vec::new(),
        };
        for path in runs.iter() {
            merge.cursors.push(BlockDecoder::new(BufReader::new(File::open(path)?)));
            merge.heads.push(None);
        }
        for run in 0..merge.cursors.len() {
            merge.advance(run)?;
        }
        merge._runs = runs;
        Ok(merge)
    }

    fn advance(&mut self, run: usize) -> Result<()> {
        if let Some(object) = self.cursors[run].next().transpose()? {
            self.heap.push(Reverse((object.sort_key(), run)));
            self.heads[run] = Some(object);
        }
        Ok(())
    }

    fn next_object(&mut self) -> Result<Option<T>> {
        let Some(Reverse((_, run))) = self.heap.pop() else {
            return Ok(None)
        };
        let object = self.heads[run].take();
        self.advance(run)?;
        Ok(object)
    }
}

impl<T: SortKey + Decode<()>> Iterator for Merge<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.failed {
            return None
        }
        let next = self.next_object();
        if next.is_err() {
            self.failed = true;
        }
        next.transpose()
    }
}
