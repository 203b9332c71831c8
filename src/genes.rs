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

//! V/D/J/C gene hits and the V/J/C signature that separates clonotypes
//! sharing a clonal sequence.

use std::cmp::Ordering;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize, Encode, Decode)]
pub enum GeneType {
    #[serde(rename = "V")]
    Variable,
    #[serde(rename = "D")]
    Diversity,
    #[serde(rename = "J")]
    Joining,
    #[serde(rename = "C")]
    Constant,
}

impl GeneType {
    pub const ALL: [GeneType; 4] = [GeneType::Variable, GeneType::Diversity, GeneType::Joining, GeneType::Constant];

    /// Gene types that take part in the clonotype signature, in signature order.
    pub const VJC: [GeneType; 3] = [GeneType::Variable, GeneType::Joining, GeneType::Constant];

    pub fn index(self) -> usize {
        match self {
            GeneType::Variable => 0,
            GeneType::Diversity => 1,
            GeneType::Joining => 2,
            GeneType::Constant => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            GeneType::Variable => 'V',
            GeneType::Diversity => 'D',
            GeneType::Joining => 'J',
            GeneType::Constant => 'C',
        }
    }
}

impl std::str::FromStr for GeneType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V" | "v" => Ok(GeneType::Variable),
            "D" | "d" => Ok(GeneType::Diversity),
            "J" | "j" => Ok(GeneType::Joining),
            "C" | "c" => Ok(GeneType::Constant),
            _ => Err(format!("'{}' is not a valid GeneType", s)),
        }
    }
}

/// Name of a reference gene, eg. `TRBV12-3*00`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Encode, Decode)]
pub struct GeneId(pub String);

impl GeneId {
    pub fn new(name: &str) -> Self {
        GeneId(name.to_string())
    }
}

impl std::fmt::Display for GeneId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct GeneHit {
    pub gene: GeneId,
    pub score: f32,
}

impl GeneHit {
    pub fn new(gene: &str, score: f32) -> Self {
        GeneHit { gene: GeneId::new(gene), score }
    }
}

fn by_score_then_id(a: &GeneHit, b: &GeneHit) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.gene.cmp(&b.gene))
}

/// Hits of one read or clonotype for every gene type, best hit first.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct GeneHits {
    hits: [Vec<GeneHit>; 4],
}

impl GeneHits {
    pub fn new() -> Self {
        GeneHits::default()
    }

    /// Builder style [set](GeneHits::set).
    pub fn with(mut self, gene_type: GeneType, hits: Vec<GeneHit>) -> Self {
        self.set(gene_type, hits);
        self
    }

    pub fn set(&mut self, gene_type: GeneType, mut hits: Vec<GeneHit>) {
        hits.sort_by(by_score_then_id);
        self.hits[gene_type.index()] = hits;
    }

    pub fn get(&self, gene_type: GeneType) -> &[GeneHit] {
        &self.hits[gene_type.index()]
    }

    pub fn best(&self, gene_type: GeneType) -> Option<&GeneHit> {
        self.hits[gene_type.index()].first()
    }

    pub fn best_gene(&self, gene_type: GeneType) -> Option<&GeneId> {
        self.best(gene_type).map(|x| &x.gene)
    }

    /// Score of the best hit, zero when there is no hit.
    pub fn best_score(&self, gene_type: GeneType) -> f32 {
        self.best(gene_type).map(|x| x.score).unwrap_or(0.0)
    }

    pub fn has(&self, gene_type: GeneType) -> bool {
        !self.hits[gene_type.index()].is_empty()
    }
}

/// Value of one gene type in a [GeneSignature].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignatureMarker {
    /// Clonotypes are not separated by this gene type.
    DontCare,
    /// No hit for this gene type.
    Absent,
    Gene(GeneId),
}

impl SignatureMarker {
    pub fn is_compatible(&self, other: &SignatureMarker) -> bool {
        match (self, other) {
            (SignatureMarker::Gene(a), SignatureMarker::Gene(b)) => a == b,
            _ => true,
        }
    }
}

/// Top V, J and C genes of a read, the key of a clonotype within a clonal sequence.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct GeneSignature {
    markers: [SignatureMarker; 3],
}

impl GeneSignature {
    /// Signature from the best hits; `separate` says which of V, J, C separate clonotypes.
    pub fn from_hits(hits: &GeneHits, separate: [bool; 3]) -> Self {
        let markers = [0, 1, 2].map(|idx| {
            if !separate[idx] {
                SignatureMarker::DontCare
            } else {
                match hits.best_gene(GeneType::VJC[idx]) {
                    Some(gene) => SignatureMarker::Gene(gene.clone()),
                    None => SignatureMarker::Absent,
                }
            }
        });
        GeneSignature { markers }
    }

    pub fn marker(&self, gene_type: GeneType) -> Option<&SignatureMarker> {
        GeneType::VJC.iter().position(|x| *x == gene_type).map(|idx| &self.markers[idx])
    }

    /// Signatures are compatible when every gene called in both is the same gene.
    pub fn is_compatible(&self, other: &GeneSignature) -> bool {
        self.markers.iter().zip(other.markers.iter()).all(|(a, b)| a.is_compatible(b))
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn hits_are_sorted_best_first() {
        use super::{GeneHit, GeneHits, GeneType};

        let hits = GeneHits::new().with(GeneType::Variable, vec![GeneHit::new("TRBV2", 100.0), GeneHit::new("TRBV1", 250.0), GeneHit::new("TRBV0", 100.0)]);

        assert_eq!(hits.best_gene(GeneType::Variable).unwrap().0, "TRBV1");
        assert_eq!(hits.get(GeneType::Variable)[1].gene.0, "TRBV0");
        assert_eq!(hits.best_score(GeneType::Joining), 0.0);
        assert!(!hits.has(GeneType::Constant));
    }

    #[test]
    fn signature_compatibility() {
        use super::{GeneHit, GeneHits, GeneSignature, GeneType};

        let v1 = GeneHits::new().with(GeneType::Variable, vec![GeneHit::new("V1", 100.0)]).with(GeneType::Joining, vec![GeneHit::new("J1", 50.0)]);
        let v2 = GeneHits::new().with(GeneType::Variable, vec![GeneHit::new("V2", 100.0)]).with(GeneType::Joining, vec![GeneHit::new("J1", 50.0)]);
        let no_v = GeneHits::new().with(GeneType::Joining, vec![GeneHit::new("J1", 50.0)]);

        let separate = [true, true, false];
        let s1 = GeneSignature::from_hits(&v1, separate);
        let s2 = GeneSignature::from_hits(&v2, separate);
        let s3 = GeneSignature::from_hits(&no_v, separate);

        assert!(!s1.is_compatible(&s2));
        assert!(s1.is_compatible(&s3));
        assert!(s2.is_compatible(&s3));
        assert_ne!(s1, s3);

        let ignore_v = [false, true, false];
        assert_eq!(GeneSignature::from_hits(&v1, ignore_v), GeneSignature::from_hits(&v2, ignore_v));
    }
}
