//! Engagement Index - reactions, reviews and highlights per transaction
//!
//! Owns the three raw collections, keeps the derived indices in step with
//! every mutation, and writes collections back to durable storage on a
//! debounced schedule (one schedule per collection).
//!
//! # Example (JavaScript, through the wasm bindings)
//!
//! ```javascript
//! const index = new EngagementIndexHandle('{"chunkSize":500}');
//! index.load();
//! index.toggle_reaction('tx1', userId, 'like');
//! index.get_reaction_count('tx1', 'like'); // 1
//!
//! // From the host's timer loop
//! index.poll_flush(Date.now());
//! ```

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::EngagementConfig;
use crate::current_time_ms;
use crate::error::{EngagementError, Result};
use crate::indices::DerivedIndices;
use crate::model::{Collection, Highlight, Reaction, Review, ReviewInput};
use crate::persistence::{self, WriteReport};
use crate::rate_limit::DebounceTimer;
use crate::storage::KeyValueStore;

// =============================================================================
// Change notifications
// =============================================================================

/// Emitted to subscribers after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngagementChange {
    #[serde(rename_all = "camelCase")]
    Reaction {
        transaction_id: String,
        user_id: String,
        reaction_type: String,
        active: bool,
    },
    #[serde(rename_all = "camelCase")]
    Review {
        transaction_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Highlight {
        transaction_id: String,
        user_id: String,
        active: bool,
    },
    Loaded,
    Reset,
}

pub type ChangeListener = Box<dyn FnMut(&EngagementChange)>;

// =============================================================================
// Reports
// =============================================================================

/// Result of a `load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoadOutcome {
    #[serde(rename_all = "camelCase")]
    Loaded {
        reactions: usize,
        reviews: usize,
        highlights: usize,
        duplicates_dropped: usize,
    },
    /// Storage could not be read; the index starts empty.
    FellBack { error: String },
}

/// Collections written (or not) by a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub flushed: Vec<Collection>,
    pub failed: Vec<Collection>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.flushed.is_empty() && self.failed.is_empty()
    }
}

/// Snapshot of index size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub reactions: usize,
    pub reviews: usize,
    pub highlights: usize,
    pub derived_keys: usize,
    pub memo_entries: usize,
    pub dirty_collections: usize,
}

// =============================================================================
// Flush scheduling
// =============================================================================

/// One debounced deadline per collection.
#[derive(Debug, Clone)]
struct FlushScheduler {
    timers: [DebounceTimer; 3],
    dirty: BTreeSet<Collection>,
}

impl FlushScheduler {
    fn new(delay_ms: u64) -> Self {
        Self {
            timers: [
                DebounceTimer::new(delay_ms),
                DebounceTimer::new(delay_ms),
                DebounceTimer::new(delay_ms),
            ],
            dirty: BTreeSet::new(),
        }
    }

    fn slot(collection: Collection) -> usize {
        match collection {
            Collection::Reactions => 0,
            Collection::Reviews => 1,
            Collection::Highlights => 2,
        }
    }

    fn mark_dirty(&mut self, collection: Collection) {
        self.dirty.insert(collection);
    }

    fn schedule(&mut self, collection: Collection, now_ms: u64) {
        self.mark_dirty(collection);
        self.timers[Self::slot(collection)].schedule(now_ms);
    }

    fn due(&mut self, now_ms: u64) -> Vec<Collection> {
        Collection::ALL
            .into_iter()
            .filter(|c| self.timers[Self::slot(*c)].fire_if_due(now_ms))
            .collect()
    }

    fn mark_clean(&mut self, collection: Collection) {
        self.dirty.remove(&collection);
        self.timers[Self::slot(collection)].cancel();
    }

    fn cancel_all(&mut self) -> usize {
        self.timers
            .iter_mut()
            .map(DebounceTimer::cancel)
            .filter(|cancelled| *cancelled)
            .count()
    }

    fn is_pending(&self) -> bool {
        self.timers.iter().any(DebounceTimer::is_pending)
    }

    fn next_deadline(&self) -> Option<u64> {
        self.timers.iter().filter_map(DebounceTimer::deadline).min()
    }
}

// =============================================================================
// Engagement Index
// =============================================================================

/// Indexed cache over reactions, reviews and highlights.
///
/// Queries take `&self`; memo caches use interior mutability, so the index is
/// confined to a single thread.
pub struct EngagementIndex<S: KeyValueStore> {
    config: EngagementConfig,
    store: S,

    // Raw collections (authoritative, persisted)
    reactions: Vec<Reaction>,
    reviews: Vec<Review>,
    highlights: Vec<Highlight>,

    // Derived from the raw collections, never persisted
    indices: DerivedIndices,

    // Memo caches, cleared by the mutations that affect them
    user_reactions_memo: RefCell<HashMap<(String, String), Vec<String>>>,
    user_review_memo: RefCell<HashMap<(String, String), Option<Review>>>,
    average_rating_memo: RefCell<HashMap<String, f64>>,

    scheduler: FlushScheduler,
    torn_down: bool,

    listeners: Vec<(u32, ChangeListener)>,
    next_listener_id: u32,
}

impl<S: KeyValueStore> EngagementIndex<S> {
    pub fn new(store: S, config: EngagementConfig) -> Self {
        let scheduler = FlushScheduler::new(config.flush_debounce_ms);
        Self {
            config,
            store,
            reactions: Vec::new(),
            reviews: Vec::new(),
            highlights: Vec::new(),
            indices: DerivedIndices::default(),
            user_reactions_memo: RefCell::new(HashMap::new()),
            user_review_memo: RefCell::new(HashMap::new()),
            average_rating_memo: RefCell::new(HashMap::new()),
            scheduler,
            torn_down: false,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn with_defaults(store: S) -> Self {
        Self::new(store, EngagementConfig::default())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add the reaction if absent, remove it if present. Returns whether the
    /// reaction is active afterwards.
    pub fn toggle_reaction(&mut self, transaction_id: &str, user_id: &str, reaction_type: &str) -> bool {
        self.toggle_reaction_at(transaction_id, user_id, reaction_type, current_time_ms())
    }

    pub fn toggle_reaction_at(
        &mut self,
        transaction_id: &str,
        user_id: &str,
        reaction_type: &str,
        now_ms: u64,
    ) -> bool {
        let existing = self
            .reactions
            .iter()
            .position(|r| r.matches(transaction_id, user_id, reaction_type));

        let active = match existing {
            Some(pos) => {
                let removed = self.reactions.remove(pos);
                self.indices.remove_reaction(&removed);
                false
            }
            None => {
                let reaction = Reaction {
                    transaction_id: transaction_id.to_string(),
                    user_id: user_id.to_string(),
                    reaction_type: reaction_type.to_string(),
                    timestamp: now_ms,
                };
                self.indices.add_reaction(&reaction);
                self.reactions.push(reaction);
                true
            }
        };

        self.user_reactions_memo.borrow_mut().clear();
        self.schedule_flush(Collection::Reactions, now_ms);
        self.notify(&EngagementChange::Reaction {
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
            reaction_type: reaction_type.to_string(),
            active,
        });
        active
    }

    /// Add the highlight if absent, remove it if present. Returns whether the
    /// transaction is highlighted afterwards.
    pub fn toggle_highlight(&mut self, transaction_id: &str, user_id: &str) -> bool {
        self.toggle_highlight_at(transaction_id, user_id, current_time_ms())
    }

    pub fn toggle_highlight_at(&mut self, transaction_id: &str, user_id: &str, now_ms: u64) -> bool {
        let existing = self
            .highlights
            .iter()
            .position(|h| h.matches(transaction_id, user_id));

        let active = match existing {
            Some(pos) => {
                let removed = self.highlights.remove(pos);
                self.indices.remove_highlight(&removed);
                false
            }
            None => {
                let highlight = Highlight {
                    transaction_id: transaction_id.to_string(),
                    user_id: user_id.to_string(),
                    timestamp: now_ms,
                };
                self.indices.add_highlight(&highlight);
                self.highlights.push(highlight);
                true
            }
        };

        self.schedule_flush(Collection::Highlights, now_ms);
        self.notify(&EngagementChange::Highlight {
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
            active,
        });
        active
    }

    /// Insert or overwrite the review for `(transaction_id, user_id)`.
    ///
    /// The caller must ensure `input.rating` is within 1..=5; it is stored as given.
    pub fn save_review(&mut self, transaction_id: &str, user_id: &str, input: ReviewInput) {
        self.save_review_at(transaction_id, user_id, input, current_time_ms())
    }

    pub fn save_review_at(
        &mut self,
        transaction_id: &str,
        user_id: &str,
        input: ReviewInput,
        now_ms: u64,
    ) {
        let review = Review {
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
            rating: input.rating,
            comment: input.comment,
            timestamp: input.timestamp,
        };

        match self
            .reviews
            .iter_mut()
            .find(|r| r.matches(transaction_id, user_id))
        {
            Some(existing) => *existing = review.clone(),
            None => self.reviews.push(review.clone()),
        }
        self.indices.upsert_review(&review);

        self.user_review_memo.borrow_mut().clear();
        self.average_rating_memo.borrow_mut().clear();
        self.schedule_flush(Collection::Reviews, now_ms);
        self.notify(&EngagementChange::Review {
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
        });
    }

    /// Recompute every derived map from the raw collections and clear all memo caches.
    pub fn rebuild_indices(&mut self) {
        self.indices = DerivedIndices::build(&self.reactions, &self.reviews, &self.highlights);
        self.clear_memos();
    }

    /// Drop all engagement data, in memory and in storage.
    ///
    /// Memory is cleared even if removing the stored keys fails.
    pub fn reset(&mut self) -> Result<()> {
        self.reactions.clear();
        self.reviews.clear();
        self.highlights.clear();
        self.indices.clear();
        self.clear_memos();
        for collection in Collection::ALL {
            self.scheduler.mark_clean(collection);
        }
        self.notify(&EngagementChange::Reset);

        for collection in Collection::ALL {
            let key = self.config.collection_key(collection.name());
            persistence::remove_collection(&mut self.store, &key)?;
        }
        info!("engagement index reset");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Reaction types `user_id` holds on `transaction_id`, in insertion order.
    pub fn get_user_reaction_types(&self, transaction_id: &str, user_id: &str) -> Vec<String> {
        let key = (transaction_id.to_string(), user_id.to_string());
        if let Some(hit) = self.user_reactions_memo.borrow().get(&key) {
            return hit.clone();
        }
        let types: Vec<String> = self
            .indices
            .reactions_for(transaction_id)
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.reaction_type.clone())
            .collect();
        self.user_reactions_memo
            .borrow_mut()
            .insert(key, types.clone());
        types
    }

    /// Number of reactions of `reaction_type` on `transaction_id`. 0 for unknown keys.
    pub fn get_reaction_count(&self, transaction_id: &str, reaction_type: &str) -> u32 {
        self.indices.reaction_count(transaction_id, reaction_type)
    }

    /// All non-zero reaction counts for a transaction.
    pub fn get_reaction_counts(&self, transaction_id: &str) -> HashMap<String, u32> {
        self.indices
            .reaction_counts_for(transaction_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_highlighted(&self, transaction_id: &str, user_id: &str) -> bool {
        self.indices.is_highlighted(transaction_id, user_id)
    }

    /// Mean rating of a transaction's reviews, 0.0 when it has none.
    pub fn get_average_rating(&self, transaction_id: &str) -> f64 {
        if let Some(hit) = self.average_rating_memo.borrow().get(transaction_id) {
            return *hit;
        }
        let reviews = self.indices.reviews_for(transaction_id);
        let average = if reviews.is_empty() {
            0.0
        } else {
            let total: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
            f64::from(total) / reviews.len() as f64
        };
        self.average_rating_memo
            .borrow_mut()
            .insert(transaction_id.to_string(), average);
        average
    }

    pub fn get_user_review(&self, transaction_id: &str, user_id: &str) -> Option<Review> {
        let key = (transaction_id.to_string(), user_id.to_string());
        if let Some(hit) = self.user_review_memo.borrow().get(&key) {
            return hit.clone();
        }
        let review = self
            .indices
            .reviews_for(transaction_id)
            .iter()
            .find(|r| r.user_id == user_id)
            .cloned();
        self.user_review_memo
            .borrow_mut()
            .insert(key, review.clone());
        review
    }

    /// The user's rating, 0 if they have not reviewed the transaction.
    pub fn get_user_rating(&self, transaction_id: &str, user_id: &str) -> u8 {
        self.get_user_review(transaction_id, user_id)
            .map(|r| r.rating)
            .unwrap_or(0)
    }

    pub fn get_reactions(&self, transaction_id: &str) -> &[Reaction] {
        self.indices.reactions_for(transaction_id)
    }

    pub fn get_reviews(&self, transaction_id: &str) -> &[Review] {
        self.indices.reviews_for(transaction_id)
    }

    /// Transactions highlighted by `user_id`, sorted.
    pub fn get_highlighted_transactions(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .indices
            .highlights_for_user(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    pub fn indices(&self) -> &DerivedIndices {
        &self.indices
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn memo_len(&self) -> usize {
        self.user_reactions_memo.borrow().len()
            + self.user_review_memo.borrow().len()
            + self.average_rating_memo.borrow().len()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            reactions: self.reactions.len(),
            reviews: self.reviews.len(),
            highlights: self.highlights.len(),
            derived_keys: self.indices.key_count(),
            memo_entries: self.memo_len(),
            dirty_collections: self.scheduler.dirty.len(),
        }
    }

    /// SHA-256 (hex) over the serialized raw collections in stored order.
    pub fn snapshot_digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.reactions)?);
        hasher.update(serde_json::to_vec(&self.reviews)?);
        hasher.update(serde_json::to_vec(&self.highlights)?);
        Ok(hex::encode(hasher.finalize()))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write one collection under its configured key.
    pub fn persist_collection(&mut self, collection: Collection) -> Result<WriteReport> {
        let key = self.config.collection_key(collection.name());
        let chunk_size = self.config.chunk_size;
        let report = match collection {
            Collection::Reactions => {
                persistence::write_collection(&mut self.store, &key, &self.reactions, chunk_size)?
            }
            Collection::Reviews => {
                persistence::write_collection(&mut self.store, &key, &self.reviews, chunk_size)?
            }
            Collection::Highlights => {
                persistence::write_collection(&mut self.store, &key, &self.highlights, chunk_size)?
            }
        };
        self.scheduler.mark_clean(collection);
        Ok(report)
    }

    /// Write all three collections now. Stops at the first failure.
    pub fn persist(&mut self) -> Result<()> {
        for collection in Collection::ALL {
            self.persist_collection(collection)?;
        }
        Ok(())
    }

    /// Flush every collection whose quiet period has elapsed at `now_ms`.
    ///
    /// Reads live state, so every mutation made before the deadline is included.
    /// Failures are logged; the collection stays dirty for the next cycle.
    pub fn poll_flush(&mut self, now_ms: u64) -> FlushReport {
        let due = self.scheduler.due(now_ms);
        self.flush_collections(due)
    }

    /// Flush every dirty collection immediately (e.g. on page hide).
    pub fn flush_now(&mut self) -> FlushReport {
        let dirty: Vec<Collection> = self.scheduler.dirty.iter().copied().collect();
        self.flush_collections(dirty)
    }

    fn flush_collections(&mut self, collections: Vec<Collection>) -> FlushReport {
        let mut report = FlushReport::default();
        for collection in collections {
            match self.persist_collection(collection) {
                Ok(written) => {
                    debug!(
                        collection = collection.name(),
                        records = written.records,
                        chunks = written.chunks,
                        "flushed collection"
                    );
                    report.flushed.push(collection);
                }
                Err(e) => {
                    warn!(collection = collection.name(), error = %e, "persist failed, keeping in-memory state");
                    report.failed.push(collection);
                }
            }
        }
        report
    }

    pub fn has_pending_flush(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Earliest pending flush deadline, for hosts that arm a single timer.
    pub fn next_flush_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// Cancel pending flushes and stop scheduling new ones. Call when the
    /// owning view is torn down.
    pub fn teardown(&mut self) {
        let cancelled = self.scheduler.cancel_all();
        self.torn_down = true;
        self.listeners.clear();
        debug!(cancelled, "engagement index torn down");
    }

    /// Replace in-memory state with the stored collections.
    ///
    /// Any read or parse failure leaves all three collections empty.
    pub fn load(&mut self) -> LoadOutcome {
        let outcome = match self.read_all() {
            Ok((reactions, reviews, highlights)) => {
                let before = reactions.len() + reviews.len() + highlights.len();
                self.reactions = dedup_reactions(reactions);
                self.reviews = dedup_reviews(reviews);
                self.highlights = dedup_highlights(highlights);
                let after = self.reactions.len() + self.reviews.len() + self.highlights.len();

                info!(
                    reactions = self.reactions.len(),
                    reviews = self.reviews.len(),
                    highlights = self.highlights.len(),
                    "loaded engagement index"
                );
                LoadOutcome::Loaded {
                    reactions: self.reactions.len(),
                    reviews: self.reviews.len(),
                    highlights: self.highlights.len(),
                    duplicates_dropped: before - after,
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to load engagement index, starting empty");
                self.reactions.clear();
                self.reviews.clear();
                self.highlights.clear();
                LoadOutcome::FellBack {
                    error: e.to_string(),
                }
            }
        };
        self.rebuild_indices();
        self.notify(&EngagementChange::Loaded);
        outcome
    }

    fn read_all(&self) -> Result<(Vec<Reaction>, Vec<Review>, Vec<Highlight>), EngagementError> {
        let key = |c: Collection| self.config.collection_key(c.name());
        let reactions = persistence::read_collection(&self.store, &key(Collection::Reactions))?;
        let reviews = persistence::read_collection(&self.store, &key(Collection::Reviews))?;
        let highlights = persistence::read_collection(&self.store, &key(Collection::Highlights))?;
        Ok((reactions, reviews, highlights))
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a change callback. Returns an id for [`Self::unsubscribe`].
    pub fn subscribe(&mut self, listener: ChangeListener) -> u32 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: u32) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, change: &EngagementChange) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(change);
        }
    }

    /// Mark `collection` dirty and arm its flush timer, unless torn down.
    /// Dirty collections stay reachable by `flush_now` either way.
    fn schedule_flush(&mut self, collection: Collection, now_ms: u64) {
        if self.torn_down {
            self.scheduler.mark_dirty(collection);
        } else {
            self.scheduler.schedule(collection, now_ms);
        }
    }

    fn clear_memos(&self) {
        self.user_reactions_memo.borrow_mut().clear();
        self.user_review_memo.borrow_mut().clear();
        self.average_rating_memo.borrow_mut().clear();
    }
}

// =============================================================================
// Load-time uniqueness repair
// =============================================================================

fn dedup_reactions(reactions: Vec<Reaction>) -> Vec<Reaction> {
    let mut out: Vec<Reaction> = Vec::with_capacity(reactions.len());
    for reaction in reactions {
        if !out
            .iter()
            .any(|r| r.matches(&reaction.transaction_id, &reaction.user_id, &reaction.reaction_type))
        {
            out.push(reaction);
        }
    }
    out
}

/// Later reviews overwrite earlier ones, matching `save_review`.
fn dedup_reviews(reviews: Vec<Review>) -> Vec<Review> {
    let mut out: Vec<Review> = Vec::with_capacity(reviews.len());
    for review in reviews {
        match out
            .iter_mut()
            .find(|r| r.matches(&review.transaction_id, &review.user_id))
        {
            Some(existing) => *existing = review,
            None => out.push(review),
        }
    }
    out
}

fn dedup_highlights(highlights: Vec<Highlight>) -> Vec<Highlight> {
    let mut out: Vec<Highlight> = Vec::with_capacity(highlights.len());
    for highlight in highlights {
        if !out
            .iter()
            .any(|h| h.matches(&highlight.transaction_id, &highlight.user_id))
        {
            out.push(highlight);
        }
    }
    out
}
