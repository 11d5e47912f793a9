//! Configuration for the engagement index and the list windowing engine

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Reaction types offered by the dashboard.
pub const DEFAULT_REACTION_TYPES: [&str; 5] = ["like", "love", "fire", "rocket", "diamond"];

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementConfig {
    /// Records per storage key before a collection is split into chunks
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Quiet period before a dirty collection is flushed to storage
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,

    /// Prefix prepended to every storage key owned by the index
    #[serde(default)]
    pub key_prefix: String,

    /// Reaction types rendered per row
    #[serde(default = "default_reaction_types")]
    pub reaction_types: Vec<String>,

    /// Fixed row height in pixels
    #[serde(default = "default_item_height")]
    pub item_height: f64,

    /// Rows rendered above and below the viewport
    #[serde(default = "default_overscan")]
    pub overscan: usize,

    /// Scroll/resize recompute window (one animation frame)
    #[serde(default = "default_frame_debounce_ms")]
    pub frame_debounce_ms: u64,

    /// Storage key holding the current user's id
    #[serde(default = "default_user_id_key")]
    pub user_id_key: String,
}

fn default_chunk_size() -> usize {
    500
}

fn default_flush_debounce_ms() -> u64 {
    300
}

fn default_reaction_types() -> Vec<String> {
    DEFAULT_REACTION_TYPES.iter().map(|t| t.to_string()).collect()
}

fn default_item_height() -> f64 {
    150.0
}

fn default_overscan() -> usize {
    5
}

fn default_frame_debounce_ms() -> u64 {
    16
}

fn default_user_id_key() -> String {
    "currentUserId".to_string()
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            flush_debounce_ms: default_flush_debounce_ms(),
            key_prefix: String::new(),
            reaction_types: default_reaction_types(),
            item_height: default_item_height(),
            overscan: default_overscan(),
            frame_debounce_ms: default_frame_debounce_ms(),
            user_id_key: default_user_id_key(),
        }
    }
}

impl EngagementConfig {
    /// Defaults tuned for interactive sessions.
    pub fn for_interactive() -> Self {
        Self::default()
    }

    /// Larger chunks and a longer coalescing window, for imports and seeding.
    pub fn for_bulk() -> Self {
        Self {
            chunk_size: 2000,
            flush_debounce_ms: 1000,
            ..Self::default()
        }
    }

    /// Parse from JSON, filling missing fields with defaults, then validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".into()));
        }
        if !self.item_height.is_finite() || self.item_height <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "item_height must be a positive number, got {}",
                self.item_height
            )));
        }
        if self.reaction_types.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::Invalid("reaction types must be non-empty".into()));
        }
        Ok(())
    }

    /// Storage key for a collection, with the configured prefix applied.
    pub fn collection_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }
}
