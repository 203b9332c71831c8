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

//! Nucleotide trie with bounded-error neighbourhood search.
//!
//! Both deferred read mapping and clustering look for stored sequences that
//! are a few substitutions or indels away from a query. Mutations reported by
//! [SequenceTree::search] are in query coordinates: applying them to the
//! query gives the stored sequence.

use crate::params::TreeSearchParameters;
use crate::sequence::mutations::Mutation;
use crate::sequence::mutations::Mutations;

use std::collections::BTreeMap;

const ALPHABET: [u8; 5] = [b'A', b'C', b'G', b'T', b'N'];

fn code(base: u8) -> usize {
    match base {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 4,
    }
}

/// Restricts which mutations a search may use.
pub trait MutationGuide {
    fn allow(&self, query: &[u8], mutation: &Mutation) -> bool;
}

/// Allows every mutation.
pub struct AnyMutation;

impl MutationGuide for AnyMutation {
    fn allow(&self, _query: &[u8], _mutation: &Mutation) -> bool {
        true
    }
}

#[derive(Default)]
struct Node {
    children: [Option<u32>; 5],
    values: Vec<usize>,
}

/// A stored sequence found by [SequenceTree::search].
#[derive(Debug)]
pub struct Neighbour<'a, V> {
    pub values: Vec<&'a V>,
    pub mutations: Mutations,
    pub errors: usize,
}

pub struct SequenceTree<V> {
    nodes: Vec<Node>,
    values: Vec<V>,
}

impl<V> Default for SequenceTree<V> {
    fn default() -> Self {
        SequenceTree { nodes: vec![Node::default()], values: Vec::new() }
    }
}

struct SearchState {
    node: u32,
    position: usize,
    substitutions: usize,
    deletions: usize,
    insertions: usize,
    mutations: Vec<Mutation>,
}

impl SearchState {
    fn errors(&self) -> usize {
        self.substitutions + self.deletions + self.insertions
    }
}

impl<V> SequenceTree<V> {
    pub fn new() -> Self {
        SequenceTree::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn insert(&mut self, sequence: &[u8], value: V) {
        let mut node = 0_usize;
        for base in sequence {
            let next = match self.nodes[node].children[code(*base)] {
                Some(child) => child as usize,
                None => {
                    self.nodes.push(Node::default());
                    let child = self.nodes.len() - 1;
                    self.nodes[node].children[code(*base)] = Some(child as u32);
                    child
                },
            };
            node = next;
        }
        self.values.push(value);
        self.nodes[node].values.push(self.values.len() - 1);
    }

    /// Values stored under exactly `sequence`.
    pub fn get(&self, sequence: &[u8]) -> Vec<&V> {
        let mut node = 0_usize;
        for base in sequence {
            match self.nodes[node].children[code(*base)] {
                Some(child) => node = child as usize,
                None => return Vec::new(),
            }
        }
        self.nodes[node].values.iter().map(|x| &self.values[*x]).collect()
    }

    /// Stored sequences within the error budget of `query`, fewest errors first.
    ///
    /// Each stored sequence is reported once, with the cheapest mutation set
    /// found for it. Sequences at the same cost come in the order they were
    /// first inserted.
    pub fn search<G: MutationGuide + ?Sized>(
        &self,
        query: &[u8],
        params: &TreeSearchParameters,
        guide: &G,
    ) -> Vec<Neighbour<'_, V>> {
        let mut best: BTreeMap<u32, (usize, Vec<Mutation>)> = BTreeMap::new();
        let mut stack: Vec<SearchState> = vec![SearchState { node: 0, position: 0, substitutions: 0, deletions: 0, insertions: 0, mutations: Vec::new() }];

        while let Some(state) = stack.pop() {
            let node = &self.nodes[state.node as usize];
            let errors = state.errors();
            let can_err = errors < params.max_total_errors;

            if state.position == query.len() && !node.values.is_empty() {
                let improves = best.get(&state.node).map(|(e, _)| errors < *e).unwrap_or(true);
                if improves {
                    best.insert(state.node, (errors, state.mutations.clone()));
                }
            }

            if state.position < query.len() {
                let from = query[state.position];
                // Match or substitution
                for (idx, child) in node.children.iter().enumerate() {
                    let Some(child) = child else { continue };
                    let to = ALPHABET[idx];
                    if code(from) == idx {
                        stack.push(SearchState { node: *child, position: state.position + 1, mutations: state.mutations.clone(), ..state });
                    } else if can_err && state.substitutions < params.max_substitutions {
                        let mutation = Mutation::Substitution { position: state.position, from, to };
                        if guide.allow(query, &mutation) {
                            let mut mutations = state.mutations.clone();
                            mutations.push(mutation);
                            stack.push(SearchState { node: *child, position: state.position + 1, substitutions: state.substitutions + 1, mutations, ..state });
                        }
                    }
                }
                // Query base missing from the stored sequence
                if can_err && state.deletions < params.max_deletions {
                    let mutation = Mutation::Deletion { position: state.position, from };
                    if guide.allow(query, &mutation) {
                        let mut mutations = state.mutations.clone();
                        mutations.push(mutation);
                        stack.push(SearchState { position: state.position + 1, deletions: state.deletions + 1, mutations, ..state });
                    }
                }
            }

            // Stored sequence has an extra base
            if can_err && state.insertions < params.max_insertions {
                for (idx, child) in node.children.iter().enumerate() {
                    let Some(child) = child else { continue };
                    let mutation = Mutation::Insertion { position: state.position, to: ALPHABET[idx] };
                    if guide.allow(query, &mutation) {
                        let mut mutations = state.mutations.clone();
                        mutations.push(mutation);
                        stack.push(SearchState { node: *child, insertions: state.insertions + 1, mutations, ..state });
                    }
                }
            }
        }

        let mut out: Vec<(usize, Neighbour<'_, V>)> = best.into_iter().map(|(node, (errors, mutations))| {
            let node = &self.nodes[node as usize];
            let first = node.values.first().copied().unwrap_or(usize::MAX);
            let values = node.values.iter().map(|x| &self.values[*x]).collect();
            (first, Neighbour { values, mutations: Mutations::from(mutations), errors })
        }).collect();
        out.sort_by_key(|(first, x)| (x.errors, x.mutations.iter().map(|m| m.position()).collect::<Vec<usize>>(), *first));
        out.into_iter().map(|(_, x)| x).collect()
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn exact_and_substitution_hits() {
        use super::{AnyMutation, SequenceTree};
        use crate::params::TreeSearchParameters;

        let mut tree: SequenceTree<usize> = SequenceTree::new();
        tree.insert(b"CCAAA", 0);
        tree.insert(b"CCTAA", 1);
        tree.insert(b"GGGGG", 2);
        tree.insert(b"CCAAA", 3);

        assert_eq!(tree.get(b"CCAAA"), vec![&0, &3]);

        let got = tree.search(b"CCAAA", &TreeSearchParameters::substitutions_only(1), &AnyMutation);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].errors, 0);
        assert_eq!(got[0].values, vec![&0, &3]);
        assert_eq!(got[1].errors, 1);
        assert_eq!(got[1].values, vec![&1]);
        assert_eq!(got[1].mutations.apply(b"CCAAA"), b"CCTAA".to_vec());
    }

    #[test]
    fn indels_within_budget() {
        use super::{AnyMutation, SequenceTree};
        use crate::params::TreeSearchParameters;

        let mut tree: SequenceTree<&str> = SequenceTree::new();
        tree.insert(b"CCAAAT", "insertion");
        tree.insert(b"CAAA", "deletion");
        tree.insert(b"TTTTT", "far");

        let params = TreeSearchParameters { max_substitutions: 0, max_deletions: 1, max_insertions: 1, max_total_errors: 1 };
        let got = tree.search(b"CCAAA", &params, &AnyMutation);

        assert_eq!(got.len(), 2);
        got.iter().for_each(|hit| {
            assert_eq!(hit.errors, 1);
            let target: &[u8] = if *hit.values[0] == "insertion" { b"CCAAAT" } else { b"CAAA" };
            assert_eq!(hit.mutations.apply(b"CCAAA"), target.to_vec());
        });
    }

    #[test]
    fn equal_cost_hits_keep_insertion_order() {
        use super::{AnyMutation, SequenceTree};
        use crate::params::TreeSearchParameters;

        let mut tree: SequenceTree<usize> = SequenceTree::new();
        tree.insert(b"CCGAAT", 0);
        tree.insert(b"CCAAAT", 1);
        tree.insert(b"CCCAAT", 2);

        for _ in 0..20 {
            let got = tree.search(b"CCTAAT", &TreeSearchParameters::substitutions_only(1), &AnyMutation);
            let values: Vec<usize> = got.iter().map(|x| *x.values[0]).collect();
            assert_eq!(values, vec![0, 1, 2]);
        }
    }

    #[test]
    fn guide_restricts_positions() {
        use super::{MutationGuide, SequenceTree};
        use crate::params::TreeSearchParameters;
        use crate::sequence::mutations::Mutation;

        struct OnlyAt(usize);
        impl MutationGuide for OnlyAt {
            fn allow(&self, _query: &[u8], mutation: &Mutation) -> bool {
                mutation.is_substitution() && mutation.position() == self.0
            }
        }

        let mut tree: SequenceTree<usize> = SequenceTree::new();
        tree.insert(b"CCTAA", 1);
        tree.insert(b"CCATA", 2);

        let got = tree.search(b"CCAAA", &TreeSearchParameters::substitutions_only(2), &OnlyAt(3));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].values, vec![&2]);
    }
}
