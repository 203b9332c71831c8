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

//! Per-base consensus quality of a clonotype.

use crate::error::Error;
use crate::error::Result;
use crate::sequence::MAX_QUALITY;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// How the qualities of reads supporting a clonotype are combined.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "snake_case")]
pub enum QualityAggregationType {
    /// Best quality observed at each position.
    #[default]
    Max,
    /// Mean phred score at each position.
    Average,
    /// Sum of phred scores (log error probabilities), capped at [MAX_QUALITY].
    Sum,
}

impl std::str::FromStr for QualityAggregationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "max" => Ok(QualityAggregationType::Max),
            "average" => Ok(QualityAggregationType::Average),
            "sum" => Ok(QualityAggregationType::Sum),
            _ => Err(format!("'{}' is not a valid QualityAggregationType", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QualityAggregator {
    kind: QualityAggregationType,
    values: Vec<u64>,
    observations: u64,
}

impl QualityAggregator {
    pub fn new(kind: QualityAggregationType, len: usize) -> Self {
        QualityAggregator { kind, values: vec![0; len], observations: 0 }
    }

    pub fn aggregate(&mut self, quality: &[u8]) {
        assert_eq!(quality.len(), self.values.len());
        self.values.iter_mut().zip(quality.iter()).for_each(|(acc, q)| {
            match self.kind {
                QualityAggregationType::Max => *acc = (*acc).max(*q as u64),
                QualityAggregationType::Average | QualityAggregationType::Sum => *acc += *q as u64,
            }
        });
        self.observations += 1;
    }

    /// Adds everything `other` has seen into this aggregator.
    ///
    /// Both must aggregate the same kind over sequences of the same length.
    pub fn merge(&mut self, other: &QualityAggregator) -> Result<()> {
        if self.kind != other.kind || self.values.len() != other.values.len() {
            return Err(Error::protocol(format!(
                "cannot merge {:?} qualities of length {} into {:?} qualities of length {}",
                other.kind, other.values.len(), self.kind, self.values.len(),
            )));
        }
        self.values.iter_mut().zip(other.values.iter()).for_each(|(acc, x)| {
            match self.kind {
                QualityAggregationType::Max => *acc = (*acc).max(*x),
                QualityAggregationType::Average | QualityAggregationType::Sum => *acc += *x,
            }
        });
        self.observations += other.observations;
        Ok(())
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Consensus quality, zero everywhere if nothing was aggregated.
    pub fn quality(&self) -> Vec<u8> {
        if self.observations == 0 {
            return vec![0; self.values.len()];
        }
        self.values.iter().map(|x| {
            let q = match self.kind {
                QualityAggregationType::Max | QualityAggregationType::Sum => *x,
                QualityAggregationType::Average => *x / self.observations,
            };
            q.min(MAX_QUALITY as u64) as u8
        }).collect()
    }
}
