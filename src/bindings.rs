//! JavaScript surface
//!
//! Thin `#[wasm_bindgen]` handles over the engagement index and the row
//! renderer. Structured results cross the boundary as JSON strings; clock
//! values are JS numbers (`Date.now()` / `performance.now()`).
//!
//! # Example (JavaScript)
//!
//! ```javascript
//! import init, { EngagementIndexHandle, RowRendererHandle, current_user_id } from 'engagement-cache-core';
//!
//! await init();
//! const userId = current_user_id();
//! const index = new EngagementIndexHandle('');
//! index.load();
//!
//! const rows = new RowRendererHandle('', userId, container.clientHeight);
//! rows.set_transactions_json(JSON.stringify(transactions.map(t => t.id)));
//!
//! container.onscroll = () => rows.on_scroll(container.scrollTop, performance.now());
//! requestAnimationFrame(function frame(t) {
//!   if (rows.poll(t)) render(JSON.parse(rows.visible_rows_json(index)));
//!   index.poll_flush(Date.now());
//!   requestAnimationFrame(frame);
//! });
//! ```

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::config::EngagementConfig;
use crate::engagement::EngagementIndex;
#[cfg(target_arch = "wasm32")]
use crate::identity::ensure_user_id;
use crate::model::ReviewInput;
use crate::rows::TransactionRowRenderer;
use crate::storage::KeyValueStore;

/// Install the panic hook so Rust panics show up in the browser console.
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Build, version and platform details of this module, as JSON.
#[wasm_bindgen]
pub fn module_info() -> String {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ModuleInfo {
        name: &'static str,
        version: &'static str,
        platform: &'static str,
        arch: &'static str,
    }

    let info = ModuleInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    };
    serde_json::to_string(&info).unwrap_or_default()
}

/// The current user id from `localStorage`, generated on first call.
///
/// Browser only: native builds have no durable default store to keep it in.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn current_user_id(key: Option<String>) -> Result<String, JsValue> {
    let key = key.unwrap_or_else(|| EngagementConfig::default().user_id_key);
    let mut store = open_default_store()?;
    ensure_user_id(&mut store, &key).map_err(to_js)
}

fn open_default_store() -> Result<Box<dyn KeyValueStore>, JsValue> {
    #[cfg(target_arch = "wasm32")]
    {
        let store = crate::storage::LocalStorageStore::open().map_err(to_js)?;
        Ok(Box::new(store))
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        Ok(Box::new(crate::storage::MemoryStore::new()))
    }
}

fn parse_config(config_json: &str) -> Result<EngagementConfig, JsValue> {
    if config_json.trim().is_empty() {
        Ok(EngagementConfig::default())
    } else {
        EngagementConfig::from_json(config_json).map_err(to_js)
    }
}

fn to_js<E: std::fmt::Display>(e: E) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(to_js)
}

/// JS clocks are f64 milliseconds; negative and NaN clamp to 0.
fn clock_ms(now: f64) -> u64 {
    if now.is_finite() && now > 0.0 {
        now as u64
    } else {
        0
    }
}

// ============================================================================
// Engagement Index
// ============================================================================

#[wasm_bindgen]
pub struct EngagementIndexHandle {
    inner: EngagementIndex<Box<dyn KeyValueStore>>,
}

#[wasm_bindgen]
impl EngagementIndexHandle {
    /// Create an index over local storage. Pass `''` for default config.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<EngagementIndexHandle, JsValue> {
        let config = parse_config(config_json)?;
        let store = open_default_store()?;
        Ok(EngagementIndexHandle {
            inner: EngagementIndex::new(store, config),
        })
    }

    /// Load stored collections. Returns the outcome as JSON.
    #[wasm_bindgen]
    pub fn load(&mut self) -> Result<String, JsValue> {
        to_json(&self.inner.load())
    }

    #[wasm_bindgen]
    pub fn toggle_reaction(&mut self, transaction_id: &str, user_id: &str, reaction_type: &str) -> bool {
        self.inner.toggle_reaction(transaction_id, user_id, reaction_type)
    }

    #[wasm_bindgen]
    pub fn toggle_highlight(&mut self, transaction_id: &str, user_id: &str) -> bool {
        self.inner.toggle_highlight(transaction_id, user_id)
    }

    /// `rating` must already be validated to 1-5.
    #[wasm_bindgen]
    pub fn save_review(
        &mut self,
        transaction_id: &str,
        user_id: &str,
        rating: u8,
        comment: String,
        timestamp: f64,
    ) {
        self.inner.save_review(
            transaction_id,
            user_id,
            ReviewInput {
                rating,
                comment,
                timestamp: clock_ms(timestamp),
            },
        );
    }

    #[wasm_bindgen]
    pub fn get_user_reaction_types(&self, transaction_id: &str, user_id: &str) -> Vec<JsValue> {
        self.inner
            .get_user_reaction_types(transaction_id, user_id)
            .iter()
            .map(|t| JsValue::from_str(t))
            .collect()
    }

    #[wasm_bindgen]
    pub fn get_reaction_count(&self, transaction_id: &str, reaction_type: &str) -> u32 {
        self.inner.get_reaction_count(transaction_id, reaction_type)
    }

    #[wasm_bindgen]
    pub fn is_highlighted(&self, transaction_id: &str, user_id: &str) -> bool {
        self.inner.is_highlighted(transaction_id, user_id)
    }

    #[wasm_bindgen]
    pub fn get_average_rating(&self, transaction_id: &str) -> f64 {
        self.inner.get_average_rating(transaction_id)
    }

    #[wasm_bindgen]
    pub fn get_user_rating(&self, transaction_id: &str, user_id: &str) -> u8 {
        self.inner.get_user_rating(transaction_id, user_id)
    }

    /// Reviews for a transaction as a JSON array.
    #[wasm_bindgen]
    pub fn get_reviews_json(&self, transaction_id: &str) -> Result<String, JsValue> {
        to_json(&self.inner.get_reviews(transaction_id))
    }

    #[wasm_bindgen]
    pub fn rebuild_indices(&mut self) {
        self.inner.rebuild_indices();
    }

    #[wasm_bindgen]
    pub fn persist(&mut self) -> Result<(), JsValue> {
        self.inner.persist().map_err(to_js)
    }

    /// Flush collections whose debounce has elapsed. Returns a JSON report.
    #[wasm_bindgen]
    pub fn poll_flush(&mut self, now_ms: f64) -> Result<String, JsValue> {
        to_json(&self.inner.poll_flush(clock_ms(now_ms)))
    }

    /// Flush every dirty collection now (e.g. from `pagehide`).
    #[wasm_bindgen]
    pub fn flush_now(&mut self) -> Result<String, JsValue> {
        to_json(&self.inner.flush_now())
    }

    #[wasm_bindgen]
    pub fn has_pending_flush(&self) -> bool {
        self.inner.has_pending_flush()
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsValue> {
        self.inner.reset().map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn teardown(&mut self) {
        self.inner.teardown();
    }

    #[wasm_bindgen]
    pub fn stats_json(&self) -> Result<String, JsValue> {
        to_json(&self.inner.stats())
    }

    #[wasm_bindgen]
    pub fn snapshot_digest(&self) -> Result<String, JsValue> {
        self.inner.snapshot_digest().map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn unsubscribe(&mut self, id: u32) -> bool {
        self.inner.unsubscribe(id)
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
impl EngagementIndexHandle {
    /// Call `callback(changeJson)` after every change. Returns a subscription id.
    #[wasm_bindgen]
    pub fn subscribe(&mut self, callback: js_sys::Function) -> u32 {
        self.inner
            .subscribe(Box::new(move |change: &crate::engagement::EngagementChange| {
                if let Ok(json) = serde_json::to_string(change) {
                    if let Err(e) = callback.call1(&JsValue::NULL, &JsValue::from_str(&json)) {
                        tracing::warn!(error = ?e, "change subscriber threw");
                    }
                }
            }))
    }
}

// ============================================================================
// Row Renderer
// ============================================================================

#[wasm_bindgen]
pub struct RowRendererHandle {
    inner: TransactionRowRenderer,
}

#[wasm_bindgen]
impl RowRendererHandle {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, user_id: String, viewport_height: f64) -> Result<RowRendererHandle, JsValue> {
        let config = parse_config(config_json)?;
        Ok(RowRendererHandle {
            inner: TransactionRowRenderer::new(&config, user_id, viewport_height),
        })
    }

    /// Replace the feed with a JSON array of transaction ids. Recomputes immediately.
    #[wasm_bindgen]
    pub fn set_transactions_json(&mut self, ids_json: &str) -> Result<bool, JsValue> {
        let ids: Vec<String> = serde_json::from_str(ids_json).map_err(to_js)?;
        Ok(self.inner.set_transactions(ids))
    }

    #[wasm_bindgen]
    pub fn on_scroll(&mut self, scroll_top: f64, now_ms: f64) {
        self.inner.on_scroll(scroll_top, clock_ms(now_ms));
    }

    #[wasm_bindgen]
    pub fn on_resize(&mut self, viewport_height: f64, item_height: f64, now_ms: f64) {
        self.inner.on_resize(viewport_height, item_height, clock_ms(now_ms));
    }

    /// Frame callback. True when the window changed and rows should re-render.
    #[wasm_bindgen]
    pub fn poll(&mut self, now_ms: f64) -> bool {
        self.inner.poll(clock_ms(now_ms))
    }

    /// First rendered index, or -1 when nothing is rendered.
    #[wasm_bindgen(getter)]
    pub fn start(&self) -> i32 {
        self.inner.visible_range().map_or(-1, |r| r.start as i32)
    }

    /// Last rendered index (inclusive), or -1 when nothing is rendered.
    #[wasm_bindgen(getter)]
    pub fn end(&self) -> i32 {
        self.inner.visible_range().map_or(-1, |r| r.end as i32)
    }

    #[wasm_bindgen(getter)]
    pub fn total_height(&self) -> f64 {
        self.inner.total_height()
    }

    /// Scroll offset that brings row `index` to the top of the viewport.
    #[wasm_bindgen]
    pub fn scroll_to_index(&self, index: u32) -> f64 {
        self.inner.engine().scroll_to_index(index as usize)
    }

    #[wasm_bindgen]
    pub fn visible_rows_json(&self, index: &EngagementIndexHandle) -> Result<String, JsValue> {
        to_json(&self.inner.visible_rows(&index.inner))
    }

    #[wasm_bindgen]
    pub fn unmount(&mut self, index: &mut EngagementIndexHandle) {
        self.inner.unmount(&mut index.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_info_json() {
        let info: serde_json::Value = serde_json::from_str(&module_info()).unwrap();
        assert_eq!(info["name"], "engagement-cache-core");
        assert!(info["arch"].is_string());
    }

    #[test]
    fn test_clock_ms_clamps() {
        assert_eq!(clock_ms(-5.0), 0);
        assert_eq!(clock_ms(f64::NAN), 0);
        assert_eq!(clock_ms(1234.9), 1234);
    }

    #[test]
    fn test_handles_share_index() {
        let mut index = EngagementIndexHandle::new(r#"{"overscan": 0}"#).unwrap();
        let mut rows = RowRendererHandle::new("", "me".into(), 300.0).unwrap();
        rows.set_transactions_json(r#"["a","b","c"]"#).unwrap();
        index.toggle_highlight("b", "me");

        let json = rows.visible_rows_json(&index).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[1]["transactionId"], "b");
        assert_eq!(parsed[1]["highlighted"], true);
        assert_eq!(rows.start(), 0);
        assert_eq!(rows.end(), 2);

        rows.unmount(&mut index);
        assert!(!index.has_pending_flush());
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    use super::*;

    #[wasm_bindgen_test]
    fn test_wasm_user_id_is_stable() {
        let key = Some("wasmTestUserId".to_string());
        let first = current_user_id(key.clone()).unwrap();
        let second = current_user_id(key).unwrap();
        assert_eq!(first, second);
    }

    #[wasm_bindgen_test]
    fn test_wasm_flush_reaches_local_storage() {
        let mut index = EngagementIndexHandle::new(r#"{"keyPrefix": "wasm_test_"}"#).unwrap();
        index.reset().unwrap();
        index.toggle_reaction("tx1", "me", "like");
        index.flush_now().unwrap();

        let mut reloaded = EngagementIndexHandle::new(r#"{"keyPrefix": "wasm_test_"}"#).unwrap();
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_reaction_count("tx1", "like"), 1);
        reloaded.reset().unwrap();
    }
}
