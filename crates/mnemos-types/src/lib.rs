//! `mnemos-types` – shared vocabulary of the Mnemos memory engine.
//!
//! # Modules
//!
//! - [`item`] – [`MemoryItem`]: the identity/importance record embedded by
//!   every subsystem's memory type.
//! - [`config`] – [`MemoryConfiguration`]: capacities, thresholds and
//!   concurrency settings, with serde defaults and `MNEMOS_*` overrides.
//!
//! The crate root holds the small enums passed across subsystem boundaries:
//! [`MemoryType`], [`Query`], [`MemoryUpdate`] and the engine-wide
//! [`MemoryError`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod item;

pub use config::{MemoryConfiguration, SimilarityMetric, VectorIndexKind, apply_env_overrides};
pub use item::{DEFAULT_DECAY_RATE, DEFAULT_IMPORTANCE, MemoryItem, hours_between};

/// Caller metadata and structured attributes: string keys to JSON values.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Render a metadata value as the plain string used for index keys.
///
/// Strings are used verbatim (no surrounding quotes); every other value uses
/// its compact JSON form.
pub fn value_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryType
// ─────────────────────────────────────────────────────────────────────────────

/// The four storage subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Vector,
    Episodic,
    Semantic,
    Working,
}

impl MemoryType {
    /// Every subsystem, in routing order.
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Vector,
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Working,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Vector => "vector",
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Working => "working",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(MemoryType::Vector),
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "working" => Ok(MemoryType::Working),
            other => Err(MemoryError::InvalidConfiguration(format!("unknown memory type: {other}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query
// ─────────────────────────────────────────────────────────────────────────────

/// A retrieval query: free text, or a structured key/value match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Query {
    Text(String),
    Attributes(Metadata),
}

impl Query {
    pub fn text(text: impl Into<String>) -> Self {
        Query::Text(text.into())
    }

    pub fn attributes<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, serde_json::Value)>,
    {
        Query::Attributes(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Flatten the query into text, e.g. for the placeholder encoder.
    ///
    /// Attribute queries render as `key value` pairs in key order.
    pub fn as_search_text(&self) -> String {
        match self {
            Query::Text(text) => text.clone(),
            Query::Attributes(attrs) => {
                let mut pairs: Vec<(&String, &serde_json::Value)> = attrs.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                pairs
                    .into_iter()
                    .map(|(k, v)| format!("{k} {}", value_key(v)))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryUpdate
// ─────────────────────────────────────────────────────────────────────────────

/// Partial update of the base fields shared by every subsystem.
///
/// `None` leaves the field unchanged; `metadata` entries are merged into the
/// existing map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub metadata: Option<Metadata>,
    pub importance: Option<f64>,
}

impl MemoryUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Default::default() }
    }

    pub fn importance(importance: f64) -> Self {
        Self { importance: Some(importance), ..Default::default() }
    }

    /// `true` when the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.metadata.is_none() && self.importance.is_none()
    }

    /// Apply the update to `item`.  Returns `true` when the content changed.
    pub fn apply_to(&self, item: &mut MemoryItem) -> bool {
        let mut content_changed = false;
        if let Some(content) = &self.content
            && *content != item.content
        {
            item.content = content.clone();
            content_changed = true;
        }
        if let Some(metadata) = &self.metadata {
            item.metadata.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(importance) = self.importance {
            item.importance = importance.clamp(0.0, 1.0);
        }
        content_changed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryError
// ─────────────────────────────────────────────────────────────────────────────

/// Engine-wide error type.
///
/// Lookups of unknown ids are not errors: they surface as `false`/`None`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemoryError {
    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{subsystem} subsystem failed: {details}")]
    Subsystem { subsystem: MemoryType, details: String },

    #[error("{0} subsystem timed out")]
    Timeout(MemoryType),

    #[error("Store failed in every targeted subsystem: {0}")]
    StoreFailed(String),
}
