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

//! Sample, cell and molecule barcodes attached to reads.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use bincode::{Decode, Encode};

/// Weight of every observed tag tuple.
///
/// A tag tuple lists the tags of a read in a fixed order, eg.
/// `[sample, cell barcode, UMI]`.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct TagCount {
    counts: BTreeMap<Vec<String>, f64>,
}

impl TagCount {
    pub fn new() -> Self {
        TagCount::default()
    }

    pub fn singleton(tags: &[&str], weight: f64) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(tags.iter().map(|x| x.to_string()).collect(), weight);
        TagCount { counts }
    }

    pub fn add(&mut self, other: &TagCount) {
        other.counts.iter().for_each(|(tags, weight)| {
            *self.counts.entry(tags.clone()).or_insert(0.0) += *weight;
        });
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<String>, &f64)> {
        self.counts.iter()
    }

    /// Distinct tag tuples cut to their first `depth` tags.
    pub fn prefixes(&self, depth: usize) -> BTreeSet<Vec<String>> {
        self.counts.keys().map(|tags| tags.iter().take(depth).cloned().collect()).collect()
    }
}

/// Fraction of the smaller prefix set that is also found in the larger one.
pub fn overlap_fraction(a: &BTreeSet<Vec<String>>, b: &BTreeSet<Vec<String>>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}
