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

/// A single point mutation, positions are in the coordinates of the sequence being mutated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Mutation {
    Substitution { position: usize, from: u8, to: u8 },
    /// Removes the base at `position`.
    Deletion { position: usize, from: u8 },
    /// Inserts `to` before the base at `position`.
    Insertion { position: usize, to: u8 },
}

impl Mutation {
    pub fn position(&self) -> usize {
        match *self {
            Mutation::Substitution { position, .. } => position,
            Mutation::Deletion { position, .. } => position,
            Mutation::Insertion { position, .. } => position,
        }
    }

    pub fn is_substitution(&self) -> bool {
        matches!(self, Mutation::Substitution { .. })
    }
}

/// Ordered set of mutations turning one sequence into another.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Mutations {
    mutations: Vec<Mutation>,
}

impl From<Vec<Mutation>> for Mutations {
    fn from(mut mutations: Vec<Mutation>) -> Self {
        mutations.sort_by_key(|x| x.position());
        Mutations { mutations }
    }
}

impl Mutations {
    pub fn new() -> Self {
        Mutations::default()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.mutations.iter()
    }

    pub fn count_substitutions(&self) -> usize {
        self.mutations.iter().filter(|x| x.is_substitution()).count()
    }

    /// Applies the mutations to `seq`.
    pub fn apply(&self, seq: &[u8]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::with_capacity(seq.len() + self.mutations.len());
        let mut next = self.mutations.iter().peekable();
        for pos in 0..=seq.len() {
            let mut deleted = false;
            let mut substituted: Option<u8> = None;
            while let Some(mutation) = next.next_if(|x| x.position() == pos) {
                match *mutation {
                    Mutation::Insertion { to, .. } => out.push(to),
                    Mutation::Deletion { .. } => deleted = true,
                    Mutation::Substitution { to, .. } => substituted = Some(to),
                }
            }
            if pos < seq.len() && !deleted {
                out.push(substituted.unwrap_or(seq[pos]));
            }
        }
        out
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn apply_mixed_mutations() {
        use super::{Mutation, Mutations};

        let mutations = Mutations::from(vec![
            Mutation::Deletion { position: 3, from: b'A' },
            Mutation::Substitution { position: 0, from: b'C', to: b'G' },
            Mutation::Insertion { position: 5, to: b'T' },
        ]);

        assert_eq!(mutations.apply(b"CCAAA"), b"GCAAT".to_vec());
        assert_eq!(mutations.len(), 3);
        assert_eq!(mutations.count_substitutions(), 1);
        assert_eq!(mutations.iter().map(|x| x.position()).collect::<Vec<usize>>(), vec![0, 3, 5]);
    }
}
