//! Derived engagement indices
//!
//! Every map here is a pure function of the three raw collections. Mutations
//! are applied incrementally; `build` recomputes from scratch and must produce
//! an equal value for the same collections.

use std::collections::{HashMap, HashSet};

use crate::model::{Highlight, Reaction, Review};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedIndices {
    // transaction_id -> reactions, in collection order
    reactions_by_transaction: HashMap<String, Vec<Reaction>>,
    // transaction_id -> reaction type -> count (no zero entries)
    reaction_counts: HashMap<String, HashMap<String, u32>>,
    // transaction_id -> reviews, in collection order
    reviews_by_transaction: HashMap<String, Vec<Review>>,
    // user_id -> highlighted transaction ids
    highlights_by_user: HashMap<String, HashSet<String>>,
}

impl DerivedIndices {
    pub fn build(reactions: &[Reaction], reviews: &[Review], highlights: &[Highlight]) -> Self {
        let mut indices = Self::default();
        for reaction in reactions {
            indices.add_reaction(reaction);
        }
        for review in reviews {
            indices
                .reviews_by_transaction
                .entry(review.transaction_id.clone())
                .or_default()
                .push(review.clone());
        }
        for highlight in highlights {
            indices.add_highlight(highlight);
        }
        indices
    }

    // =========================================================================
    // Incremental maintenance
    // =========================================================================

    pub fn add_reaction(&mut self, reaction: &Reaction) {
        self.reactions_by_transaction
            .entry(reaction.transaction_id.clone())
            .or_default()
            .push(reaction.clone());
        *self
            .reaction_counts
            .entry(reaction.transaction_id.clone())
            .or_default()
            .entry(reaction.reaction_type.clone())
            .or_insert(0) += 1;
    }

    pub fn remove_reaction(&mut self, reaction: &Reaction) {
        let tx = &reaction.transaction_id;

        if let Some(list) = self.reactions_by_transaction.get_mut(tx) {
            if let Some(pos) = list.iter().position(|r| {
                r.matches(tx, &reaction.user_id, &reaction.reaction_type)
            }) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.reactions_by_transaction.remove(tx);
            }
        }

        if let Some(counts) = self.reaction_counts.get_mut(tx) {
            if let Some(count) = counts.get_mut(&reaction.reaction_type) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&reaction.reaction_type);
                }
            }
            if counts.is_empty() {
                self.reaction_counts.remove(tx);
            }
        }
    }

    /// Replace the review for the same (transaction, user) in place, or append.
    pub fn upsert_review(&mut self, review: &Review) {
        let list = self
            .reviews_by_transaction
            .entry(review.transaction_id.clone())
            .or_default();
        match list
            .iter_mut()
            .find(|r| r.matches(&review.transaction_id, &review.user_id))
        {
            Some(existing) => *existing = review.clone(),
            None => list.push(review.clone()),
        }
    }

    pub fn add_highlight(&mut self, highlight: &Highlight) {
        self.highlights_by_user
            .entry(highlight.user_id.clone())
            .or_default()
            .insert(highlight.transaction_id.clone());
    }

    pub fn remove_highlight(&mut self, highlight: &Highlight) {
        if let Some(set) = self.highlights_by_user.get_mut(&highlight.user_id) {
            set.remove(&highlight.transaction_id);
            if set.is_empty() {
                self.highlights_by_user.remove(&highlight.user_id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.reactions_by_transaction.clear();
        self.reaction_counts.clear();
        self.reviews_by_transaction.clear();
        self.highlights_by_user.clear();
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn reactions_for(&self, transaction_id: &str) -> &[Reaction] {
        self.reactions_by_transaction
            .get(transaction_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn reaction_count(&self, transaction_id: &str, reaction_type: &str) -> u32 {
        self.reaction_counts
            .get(transaction_id)
            .and_then(|counts| counts.get(reaction_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn reaction_counts_for(&self, transaction_id: &str) -> Option<&HashMap<String, u32>> {
        self.reaction_counts.get(transaction_id)
    }

    pub fn reviews_for(&self, transaction_id: &str) -> &[Review] {
        self.reviews_by_transaction
            .get(transaction_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_highlighted(&self, transaction_id: &str, user_id: &str) -> bool {
        self.highlights_by_user
            .get(user_id)
            .is_some_and(|set| set.contains(transaction_id))
    }

    pub fn highlights_for_user(&self, user_id: &str) -> Option<&HashSet<String>> {
        self.highlights_by_user.get(user_id)
    }

    /// Number of keys across all four maps.
    pub fn key_count(&self) -> usize {
        self.reactions_by_transaction.len()
            + self.reaction_counts.len()
            + self.reviews_by_transaction.len()
            + self.highlights_by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(tx: &str, user: &str, kind: &str) -> Reaction {
        Reaction {
            transaction_id: tx.into(),
            user_id: user.into(),
            reaction_type: kind.into(),
            timestamp: 1,
        }
    }

    #[test]
    fn test_counts_drop_zero_entries() {
        let like = reaction("tx1", "u1", "like");
        let mut indices = DerivedIndices::default();
        indices.add_reaction(&like);
        assert_eq!(indices.reaction_count("tx1", "like"), 1);

        indices.remove_reaction(&like);
        assert_eq!(indices.reaction_count("tx1", "like"), 0);
        assert_eq!(indices, DerivedIndices::default());
    }

    #[test]
    fn test_incremental_matches_build() {
        let reactions = vec![
            reaction("tx1", "u1", "like"),
            reaction("tx1", "u2", "like"),
            reaction("tx2", "u1", "fire"),
        ];
        let mut incremental = DerivedIndices::default();
        for r in &reactions {
            incremental.add_reaction(r);
        }
        incremental.remove_reaction(&reactions[0]);

        let rebuilt = DerivedIndices::build(&reactions[1..], &[], &[]);
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn test_upsert_review_replaces_in_place() {
        let mut indices = DerivedIndices::default();
        let mut review = Review {
            transaction_id: "tx1".into(),
            user_id: "u1".into(),
            rating: 3,
            comment: String::new(),
            timestamp: 1,
        };
        indices.upsert_review(&review);
        review.rating = 5;
        indices.upsert_review(&review);

        assert_eq!(indices.reviews_for("tx1").len(), 1);
        assert_eq!(indices.reviews_for("tx1")[0].rating, 5);
    }

    #[test]
    fn test_unknown_keys_are_empty() {
        let indices = DerivedIndices::default();
        assert_eq!(indices.reaction_count("nope", "like"), 0);
        assert!(indices.reactions_for("nope").is_empty());
        assert!(!indices.is_highlighted("nope", "u1"));
    }
}
