//! Transaction Row Renderer - joins the visible window with engagement state
//!
//! Holds the ordered transaction feed and a [`WindowingEngine`]; for each
//! row in the window it asks the [`EngagementIndex`] for counts, flags and
//! ratings. Rendering itself (DOM, theming) belongs to the view layer.

use serde::Serialize;

use crate::config::EngagementConfig;
use crate::engagement::EngagementIndex;
use crate::storage::KeyValueStore;
use crate::viewport::{VisibleRange, WindowingEngine};

/// Count for one reaction type, and whether the current user holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    #[serde(rename = "type")]
    pub reaction_type: String,
    pub count: u32,
    pub active: bool,
}

/// Everything a row needs to draw itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub index: usize,
    pub transaction_id: String,
    pub top: f64,
    pub reactions: Vec<ReactionSummary>,
    pub highlighted: bool,
    pub average_rating: f64,
    pub user_rating: u8,
}

pub struct TransactionRowRenderer {
    transactions: Vec<String>,
    engine: WindowingEngine,
    current_user_id: String,
    reaction_types: Vec<String>,
    mounted: bool,
}

impl TransactionRowRenderer {
    pub fn new(config: &EngagementConfig, current_user_id: impl Into<String>, viewport_height: f64) -> Self {
        Self {
            transactions: Vec::new(),
            engine: WindowingEngine::from_config(config, viewport_height),
            current_user_id: current_user_id.into(),
            reaction_types: config.reaction_types.clone(),
            mounted: true,
        }
    }

    /// Replace the feed (load, filter, sort). The window is recomputed now.
    ///
    /// Returns true when the rows to render changed: either the window moved
    /// or the ids differ, as after a same-length sort.
    pub fn set_transactions(&mut self, transaction_ids: Vec<String>) -> bool {
        let ids_changed = self.transactions != transaction_ids;
        self.transactions = transaction_ids;
        let window_moved = self.engine.set_item_count(self.transactions.len());
        ids_changed || window_moved
    }

    pub fn on_scroll(&mut self, scroll_top: f64, now_ms: u64) {
        if self.mounted {
            self.engine.on_scroll(scroll_top, now_ms);
        }
    }

    pub fn on_resize(&mut self, viewport_height: f64, item_height: f64, now_ms: u64) {
        if self.mounted {
            self.engine.on_resize(viewport_height, item_height, now_ms);
        }
    }

    /// Frame callback. Returns whether the visible window changed.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        self.mounted && self.engine.poll(now_ms)
    }

    pub fn visible_range(&self) -> Option<VisibleRange> {
        self.engine.range()
    }

    pub fn total_height(&self) -> f64 {
        self.engine.total_height()
    }

    pub fn engine(&self) -> &WindowingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut WindowingEngine {
        &mut self.engine
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Build row views for the current window.
    pub fn visible_rows<S: KeyValueStore>(&self, index: &EngagementIndex<S>) -> Vec<RowView> {
        self.engine
            .visible_items()
            .into_iter()
            .filter_map(|item| self.row_at(index, item.index))
            .collect()
    }

    /// Row view for feed position `position`, if it exists.
    pub fn row_at<S: KeyValueStore>(&self, index: &EngagementIndex<S>, position: usize) -> Option<RowView> {
        let transaction_id = self.transactions.get(position)?;
        let user = self.current_user_id.as_str();
        let held = index.get_user_reaction_types(transaction_id, user);

        let reactions = self
            .reaction_types
            .iter()
            .map(|reaction_type| ReactionSummary {
                reaction_type: reaction_type.clone(),
                count: index.get_reaction_count(transaction_id, reaction_type),
                active: held.contains(reaction_type),
            })
            .collect();

        Some(RowView {
            index: position,
            transaction_id: transaction_id.clone(),
            top: self.engine.state().offset_for_index(position),
            reactions,
            highlighted: index.is_highlighted(transaction_id, user),
            average_rating: index.get_average_rating(transaction_id),
            user_rating: index.get_user_rating(transaction_id, user),
        })
    }

    /// Tear down the view: cancel the pending frame and the index's pending flushes.
    pub fn unmount<S: KeyValueStore>(&mut self, index: &mut EngagementIndex<S>) {
        self.engine.cancel();
        self.engine.clear_listeners();
        index.teardown();
        self.mounted = false;
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }
}
