//! Viewport Windowing Engine - fixed-height virtual scrolling
//!
//! Given N rows of height H, a viewport of height V scrolled to S, and an
//! overscan of O rows, renders only
//!
//! ```text
//! start = clamp(floor(S / H) - O, 0, N-1)
//! end   = clamp(ceil((S + V) / H) + O, 0, N-1)
//! ```
//!
//! Row i is absolutely positioned at `i * H` inside a spacer of height `N * H`,
//! so the native scrollbar behaves as if every row were present.
//!
//! Rows must share one height. A height change is handled as a full recompute.

use serde::Serialize;
use tracing::debug;

use crate::config::EngagementConfig;
use crate::rate_limit::DebounceTimer;

// ============================================================================
// Geometry
// ============================================================================

/// Inputs to a window computation. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub item_height: f64,
    pub overscan: usize,
    pub item_count: usize,
}

/// Inclusive range of row indices to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

impl VisibleRange {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// A row to materialize and where to place it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VirtualItem {
    pub index: usize,
    pub top: f64,
}

/// Negative and NaN lengths collapse to zero.
fn non_negative(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}

fn valid_item_height(height: f64) -> Option<f64> {
    (height.is_finite() && height > 0.0).then_some(height)
}

impl ViewportState {
    /// Rows to render, or `None` when there is nothing to render (no rows, or
    /// an unusable item height).
    pub fn visible_range(&self) -> Option<VisibleRange> {
        if self.item_count == 0 {
            return None;
        }
        let height = valid_item_height(self.item_height)?;
        let scroll = non_negative(self.scroll_top);
        let viewport = non_negative(self.viewport_height);
        let last = self.item_count - 1;

        // Float-to-int casts saturate, so huge offsets clamp to `last`
        let first_visible = (scroll / height).floor() as usize;
        let last_visible = ((scroll + viewport) / height).ceil() as usize;

        Some(VisibleRange {
            start: first_visible.saturating_sub(self.overscan).min(last),
            end: last_visible.saturating_add(self.overscan).min(last),
        })
    }

    /// Height of the scroll spacer, `N * H`.
    pub fn total_height(&self) -> f64 {
        valid_item_height(self.item_height)
            .map(|h| self.item_count as f64 * h)
            .unwrap_or(0.0)
    }

    /// Absolute top offset of row `index`.
    pub fn offset_for_index(&self, index: usize) -> f64 {
        valid_item_height(self.item_height)
            .map(|h| index as f64 * h)
            .unwrap_or(0.0)
    }

    /// Largest meaningful scroll offset, `max(N*H - V, 0)`.
    pub fn max_scroll_top(&self) -> f64 {
        (self.total_height() - non_negative(self.viewport_height)).max(0.0)
    }
}

// ============================================================================
// Windowing Engine
// ============================================================================

pub type RangeListener = Box<dyn FnMut(Option<VisibleRange>)>;

/// Tracks viewport state and recomputes the visible window.
///
/// Scroll and resize are coalesced to one recompute per frame; the host calls
/// [`WindowingEngine::poll`] from `requestAnimationFrame`. Item-count changes
/// recompute immediately so a filtered feed never renders stale rows.
pub struct WindowingEngine {
    state: ViewportState,
    range: Option<VisibleRange>,
    frame: DebounceTimer,
    listeners: Vec<RangeListener>,
    recompute_count: u64,
}

impl WindowingEngine {
    pub fn new(viewport_height: f64, item_height: f64, overscan: usize, frame_ms: u64) -> Self {
        let mut engine = Self {
            state: ViewportState {
                scroll_top: 0.0,
                viewport_height,
                item_height,
                overscan,
                item_count: 0,
            },
            range: None,
            frame: DebounceTimer::new(frame_ms),
            listeners: Vec::new(),
            recompute_count: 0,
        };
        engine.recompute();
        engine
    }

    pub fn from_config(config: &EngagementConfig, viewport_height: f64) -> Self {
        Self::new(
            viewport_height,
            config.item_height,
            config.overscan,
            config.frame_debounce_ms,
        )
    }

    /// Record a scroll offset; the window follows on the next frame.
    pub fn on_scroll(&mut self, scroll_top: f64, now_ms: u64) {
        self.state.scroll_top = scroll_top;
        self.frame.schedule(now_ms);
    }

    /// Record new viewport and row heights; the window follows on the next frame.
    pub fn on_resize(&mut self, viewport_height: f64, item_height: f64, now_ms: u64) {
        self.state.viewport_height = viewport_height;
        self.state.item_height = item_height;
        self.frame.schedule(now_ms);
    }

    pub fn set_overscan(&mut self, overscan: usize) -> bool {
        self.state.overscan = overscan;
        self.recompute()
    }

    /// Update the row count and recompute now. Returns whether the window changed.
    pub fn set_item_count(&mut self, item_count: usize) -> bool {
        self.state.item_count = item_count;
        self.recompute()
    }

    /// Run the pending frame recompute if due. Returns whether the window changed.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.frame.fire_if_due(now_ms) {
            self.recompute()
        } else {
            false
        }
    }

    /// Recompute from current state, notifying listeners on change.
    pub fn recompute(&mut self) -> bool {
        self.recompute_count += 1;
        let next = self.state.visible_range();
        if next == self.range {
            return false;
        }
        debug!(
            start = next.map(|r| r.start),
            end = next.map(|r| r.end),
            item_count = self.state.item_count,
            "visible range changed"
        );
        self.range = next;
        for listener in self.listeners.iter_mut() {
            listener(next);
        }
        true
    }

    /// Drop any pending frame. Call on unmount.
    pub fn cancel(&mut self) -> bool {
        self.frame.cancel()
    }

    pub fn on_range_change(&mut self, listener: RangeListener) {
        self.listeners.push(listener);
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn range(&self) -> Option<VisibleRange> {
        self.range
    }

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    pub fn total_height(&self) -> f64 {
        self.state.total_height()
    }

    pub fn has_pending_frame(&self) -> bool {
        self.frame.is_pending()
    }

    pub fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    /// Rows of the current window with their absolute offsets.
    pub fn visible_items(&self) -> Vec<VirtualItem> {
        match self.range {
            Some(range) => range
                .indices()
                .map(|index| VirtualItem {
                    index,
                    top: self.state.offset_for_index(index),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Scroll offset that puts row `index` at the top, clamped to the scrollable extent.
    pub fn scroll_to_index(&self, index: usize) -> f64 {
        self.state
            .offset_for_index(index)
            .min(self.state.max_scroll_top())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn state(n: usize, h: f64, v: f64, s: f64, o: usize) -> ViewportState {
        ViewportState {
            scroll_top: s,
            viewport_height: v,
            item_height: h,
            overscan: o,
            item_count: n,
        }
    }

    #[test]
    fn test_dashboard_scenario() {
        let range = state(1200, 150.0, 600.0, 3000.0, 5).visible_range().unwrap();
        assert_eq!(range, VisibleRange { start: 15, end: 29 });
        assert_eq!(state(1200, 150.0, 600.0, 3000.0, 5).total_height(), 180_000.0);
    }

    #[test]
    fn test_top_of_list() {
        let range = state(1200, 150.0, 600.0, 0.0, 5).visible_range().unwrap();
        assert_eq!(range, VisibleRange { start: 0, end: 9 });
    }

    #[test]
    fn test_empty_list() {
        let s = state(0, 150.0, 600.0, 0.0, 5);
        assert_eq!(s.visible_range(), None);
        assert_eq!(s.total_height(), 0.0);
    }

    #[test]
    fn test_overscroll_clamps_end() {
        let range = state(10, 100.0, 300.0, 50_000.0, 2).visible_range().unwrap();
        assert_eq!(range, VisibleRange { start: 9, end: 9 });
    }

    #[test]
    fn test_malformed_inputs_degrade() {
        // Negative scroll and NaN viewport behave like zero
        let range = state(100, 50.0, f64::NAN, -400.0, 0).visible_range().unwrap();
        assert_eq!(range, VisibleRange { start: 0, end: 0 });

        assert_eq!(state(100, 0.0, 600.0, 0.0, 3).visible_range(), None);
        assert_eq!(state(100, f64::NAN, 600.0, 0.0, 3).visible_range(), None);

        let range = state(100, 50.0, 600.0, f64::INFINITY, 3).visible_range().unwrap();
        assert_eq!(range, VisibleRange { start: 99, end: 99 });
    }

    #[test]
    fn test_scroll_is_frame_debounced() {
        let mut engine = WindowingEngine::new(600.0, 150.0, 5, 16);
        engine.set_item_count(1200);
        let before = engine.range();

        engine.on_scroll(1000.0, 0);
        engine.on_scroll(2000.0, 5);
        engine.on_scroll(3000.0, 10);
        assert_eq!(engine.range(), before);
        assert!(!engine.poll(20));
        assert!(engine.poll(26));
        assert_eq!(engine.range(), Some(VisibleRange { start: 15, end: 29 }));
    }

    #[test]
    fn test_item_count_change_is_immediate() {
        let mut engine = WindowingEngine::new(600.0, 150.0, 5, 16);
        engine.set_item_count(1200);
        engine.on_scroll(3000.0, 0);
        engine.poll(16);

        // Filter shrinks the feed: window must clamp without waiting for a frame
        assert!(engine.set_item_count(20));
        assert_eq!(engine.range(), Some(VisibleRange { start: 15, end: 19 }));
        assert!(engine.set_item_count(0));
        assert_eq!(engine.range(), None);
        assert!(engine.visible_items().is_empty());
    }

    #[test]
    fn test_resize_recomputes() {
        let mut engine = WindowingEngine::new(600.0, 150.0, 0, 16);
        engine.set_item_count(100);
        engine.on_resize(600.0, 100.0, 0);
        engine.poll(16);
        assert_eq!(engine.range(), Some(VisibleRange { start: 0, end: 6 }));
        assert_eq!(engine.total_height(), 10_000.0);
    }

    #[test]
    fn test_visible_items_offsets() {
        let mut engine = WindowingEngine::new(300.0, 100.0, 1, 16);
        engine.set_item_count(50);
        engine.on_scroll(1000.0, 0);
        engine.poll(16);

        let items = engine.visible_items();
        assert_eq!(items.first().map(|i| i.index), Some(9));
        assert_eq!(items.last().map(|i| i.index), Some(14));
        assert!(items.iter().all(|i| i.top == i.index as f64 * 100.0));
    }

    #[test]
    fn test_listeners_fire_on_change_only() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let mut engine = WindowingEngine::new(600.0, 150.0, 5, 16);
        engine.on_range_change(Box::new(move |range: Option<VisibleRange>| {
            sink.borrow_mut().push(range)
        }));

        engine.set_item_count(1200);
        engine.on_scroll(0.0, 0); // same window
        engine.poll(16);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_cancel_drops_pending_frame() {
        let mut engine = WindowingEngine::new(600.0, 150.0, 5, 16);
        engine.set_item_count(1200);
        engine.on_scroll(3000.0, 0);
        assert!(engine.cancel());
        assert!(!engine.poll(100));
        assert_eq!(engine.range(), Some(VisibleRange { start: 0, end: 9 }));
    }

    #[test]
    fn test_scroll_to_index_clamps() {
        let mut engine = WindowingEngine::new(600.0, 150.0, 5, 16);
        engine.set_item_count(10);
        assert_eq!(engine.scroll_to_index(2), 300.0);
        assert_eq!(engine.scroll_to_index(9), 900.0);
    }

    proptest! {
        #[test]
        fn prop_range_is_bounded_and_covers_viewport(
            n in 0usize..5000,
            h in 1.0f64..500.0,
            v in 1.0f64..3000.0,
            s in 0.0f64..2_000_000.0,
            o in 0usize..20,
        ) {
            let st = state(n, h, v, s, o);
            match st.visible_range() {
                None => prop_assert_eq!(n, 0),
                Some(range) => {
                    prop_assert!(range.start <= range.end);
                    prop_assert!(range.end <= n.saturating_sub(1));
                    for i in 0..n {
                        let top = i as f64 * h;
                        let bottom = top + h;
                        if bottom > s && top < s + v {
                            prop_assert!(range.contains(i), "row {} intersects viewport but is outside {:?}", i, range);
                        }
                    }
                }
            }
        }
    }
}
