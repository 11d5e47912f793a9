//! Engagement records
//!
//! Field names serialize in camelCase to match the keys the dashboard has
//! always written to local storage.

use serde::{Deserialize, Serialize};

/// A user's reaction of one type to one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub transaction_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub reaction_type: String,
    pub timestamp: u64,
}

impl Reaction {
    pub fn matches(&self, transaction_id: &str, user_id: &str, reaction_type: &str) -> bool {
        self.transaction_id == transaction_id
            && self.user_id == user_id
            && self.reaction_type == reaction_type
    }
}

/// A rating (1-5) with an optional comment. One per transaction and user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub transaction_id: String,
    pub user_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub timestamp: u64,
}

impl Review {
    pub fn matches(&self, transaction_id: &str, user_id: &str) -> bool {
        self.transaction_id == transaction_id && self.user_id == user_id
    }
}

/// Review fields supplied by the caller of `save_review`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub timestamp: u64,
}

/// A bookmark of one transaction by one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub transaction_id: String,
    pub user_id: String,
    pub timestamp: u64,
}

impl Highlight {
    pub fn matches(&self, transaction_id: &str, user_id: &str) -> bool {
        self.transaction_id == transaction_id && self.user_id == user_id
    }
}

/// The three raw collections owned by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Reactions,
    Reviews,
    Highlights,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Reactions,
        Collection::Reviews,
        Collection::Highlights,
    ];

    /// Base storage key for this collection.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Reactions => "reactions",
            Collection::Reviews => "reviews",
            Collection::Highlights => "highlights",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_wire_format() {
        let reaction = Reaction {
            transaction_id: "tx1".into(),
            user_id: "u1".into(),
            reaction_type: "like".into(),
            timestamp: 42,
        };
        let json = serde_json::to_string(&reaction).unwrap();
        assert_eq!(
            json,
            r#"{"transactionId":"tx1","userId":"u1","type":"like","timestamp":42}"#
        );
    }

    #[test]
    fn test_review_comment_defaults_to_empty() {
        let review: Review =
            serde_json::from_str(r#"{"transactionId":"tx1","userId":"u1","rating":4,"timestamp":1}"#)
                .unwrap();
        assert_eq!(review.comment, "");
        assert!(review.matches("tx1", "u1"));
    }
}
