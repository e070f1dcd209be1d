//! The images test users are asked to find.
//!
//! Every session walks the same plan in order; the current target is what
//! the query log measures ranks against.

use rand::Rng;

use crate::engine::ItemId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPlan {
    targets: Vec<ItemId>,
}

impl TargetPlan {
    pub fn new(targets: Vec<ItemId>) -> Self {
        Self { targets }
    }

    /// `count` distinct random items of a corpus of `corpus_len` items.
    pub fn random<R: Rng + ?Sized>(corpus_len: usize, count: usize, rng: &mut R) -> Self {
        let amount = count.min(corpus_len);
        Self {
            targets: rand::seq::index::sample(rng, corpus_len, amount).into_vec(),
        }
    }

    pub fn get(&self, index: usize) -> Option<ItemId> {
        self.targets.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn as_slice(&self) -> &[ItemId] {
        &self.targets
    }
}
