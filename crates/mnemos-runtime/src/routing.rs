//! Store routing and per-call hints.
//!
//! [`classify`] decides which subsystems an `auto`-targeted store writes to:
//!
//! | subsystem | selected when |
//! |---|---|
//! | vector | always |
//! | episodic | context, triggers, outcomes or a timestamp hint |
//! | semantic | concept, category, attributes or relationships |
//! | working | priority > 7, context tags, the `temporary` flag or dependencies |

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mnemos_types::{MemoryType, Metadata};
use serde::{Deserialize, Serialize};

/// Metadata key carrying a timestamp hint (RFC 3339 string).
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Priority above which an item is routed to working memory.
pub const WORKING_PRIORITY_THRESHOLD: u8 = 7;

/// Priority given to working items stored without one.
pub const DEFAULT_WORKING_PRIORITY: u8 = 5;

/// Where a hybrid store writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTarget {
    /// Let [`classify`] pick from the hints.
    #[default]
    Auto,
    /// Exactly these subsystems.
    Only(BTreeSet<MemoryType>),
}

impl From<MemoryType> for MemoryTarget {
    fn from(t: MemoryType) -> Self {
        MemoryTarget::Only(BTreeSet::from([t]))
    }
}

impl<const N: usize> From<[MemoryType; N]> for MemoryTarget {
    fn from(types: [MemoryType; N]) -> Self {
        MemoryTarget::Only(types.into_iter().collect())
    }
}

/// A relationship to create from a newly stored semantic node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipHint {
    /// Id of an existing semantic node.
    pub target: String,
    pub relationship_type: String,
    pub strength: f64,
    pub bidirectional: bool,
}

/// Optional per-store details.  Empty hints store a plain vector memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreHints {
    /// Precomputed embedding; the placeholder encoder is used without one.
    pub vector: Option<Vec<f32>>,
    pub importance: Option<f64>,

    // episodic
    pub context: Option<Metadata>,
    pub triggers: Vec<String>,
    pub outcomes: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub emotional_valence: Option<f64>,

    // semantic
    pub concept: Option<String>,
    pub category: Option<String>,
    pub attributes: Option<Metadata>,
    pub relationships: Vec<RelationshipHint>,
    pub confidence: Option<f64>,
    pub source: Option<String>,

    // working
    pub priority: Option<u8>,
    pub context_tags: BTreeSet<String>,
    pub temporary: bool,
    pub dependencies: BTreeSet<String>,
}

/// Optional per-retrieve details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveHints {
    /// Precomputed query embedding for the vector subsystem.
    pub query_vector: Option<Vec<f32>>,
    /// Overrides the configured vector similarity threshold.
    pub similarity_threshold: Option<f64>,
    /// Inclusive episodic time window.
    pub time_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub include_related: bool,
    pub max_depth: usize,
    pub context_tags: Option<BTreeSet<String>>,
    pub min_activation: f64,
}

impl Default for RetrieveHints {
    fn default() -> Self {
        Self {
            query_vector: None,
            similarity_threshold: None,
            time_window: None,
            include_related: false,
            max_depth: 2,
            context_tags: None,
            min_activation: 0.0,
        }
    }
}

/// Subsystems an `auto` store of `metadata` + `hints` writes to.
pub fn classify(metadata: &Metadata, hints: &StoreHints) -> BTreeSet<MemoryType> {
    let mut targets = BTreeSet::from([MemoryType::Vector]);

    if hints.context.as_ref().is_some_and(|c| !c.is_empty())
        || !hints.triggers.is_empty()
        || !hints.outcomes.is_empty()
        || hints.timestamp.is_some()
        || metadata.contains_key(TIMESTAMP_KEY)
    {
        targets.insert(MemoryType::Episodic);
    }

    if hints.concept.is_some()
        || hints.category.is_some()
        || hints.attributes.as_ref().is_some_and(|a| !a.is_empty())
        || !hints.relationships.is_empty()
    {
        targets.insert(MemoryType::Semantic);
    }

    if hints.priority.is_some_and(|p| p > WORKING_PRIORITY_THRESHOLD)
        || !hints.context_tags.is_empty()
        || hints.temporary
        || !hints.dependencies.is_empty()
    {
        targets.insert(MemoryType::Working);
    }

    targets
}
