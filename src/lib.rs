//! Engagement Cache Core - transaction engagement index and list windowing
//!
//! Compiled to WebAssembly for the streaming dashboard's transaction feed.
//!
//! # Key Features
//! - Engagement index over reactions, reviews and highlights with O(1)
//!   count, flag and rating lookups
//! - Chunked persistence to size-limited browser storage, flushed on a
//!   debounced schedule per collection
//! - Fixed-height virtual scrolling: only the visible slice of the feed is
//!   materialized
//! - Throttle, debounce and memoize primitives driven by an explicit clock
//!
//! # Modules
//! - [`engagement`] - the index, its flush scheduler and change notifications
//! - [`viewport`] - visible range computation and the frame-debounced engine
//! - [`rows`] - joins the two for each visible transaction
//! - [`persistence`] / [`storage`] - chunked key layout over a key-value store
//! - [`rate_limit`] - throttle / debounce / memoize
//! - [`bindings`] - the JavaScript surface

pub mod bindings;
pub mod config;
pub mod engagement;
pub mod error;
pub mod identity;
pub mod indices;
pub mod model;
pub mod persistence;
pub mod rate_limit;
pub mod rows;
pub mod storage;
pub mod viewport;

pub use config::EngagementConfig;
pub use engagement::{EngagementChange, EngagementIndex, FlushReport, IndexStats, LoadOutcome};
pub use error::{ConfigError, EngagementError, StorageError};
pub use model::{Collection, Highlight, Reaction, Review, ReviewInput};
pub use rows::{ReactionSummary, RowView, TransactionRowRenderer};
pub use storage::{KeyValueStore, MemoryStore};
pub use viewport::{ViewportState, VirtualItem, VisibleRange, WindowingEngine};

/// Get current time in milliseconds
pub fn current_time_ms() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now() as u64
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Install a `tracing` subscriber for native hosts and tests.
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more than once.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
