//! [`MemoryItem`] – the record every subsystem embeds.
//!
//! A memory item carries identity, an opaque text payload, metadata and the
//! bookkeeping needed to rank and evict it: access statistics plus a base
//! importance that decays exponentially with the time since the item was last
//! touched.
//!
//! # Importance model
//!
//! ```text
//! decayed  = importance × exp(−decay_rate × hours_since_last_access_or_creation)
//! boost    = min(0.2, access_count × 0.01)
//! current  = clamp(decayed + boost, 0, 1)
//! ```
//!
//! The value is recomputed on demand and never cached.
//!
//! # Example
//!
//! ```rust
//! use mnemos_types::MemoryItem;
//!
//! let mut item = MemoryItem::new("credit limit increased", Default::default())
//!     .with_importance(0.8);
//! let before = item.calculate_current_importance();
//! item.record_access();
//! assert!(item.calculate_current_importance() >= before);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Metadata;

/// Importance assigned to items created without an explicit value.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Default importance decay rate, per hour.
pub const DEFAULT_DECAY_RATE: f64 = 0.01;

/// Upper bound of the access-count boost added to the decayed importance.
const MAX_ACCESS_BOOST: f64 = 0.2;

/// Boost contributed by every recorded access.
const ACCESS_BOOST_STEP: f64 = 0.01;

/// Fractional hours from `earlier` to `later`, floored at zero.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = (later - earlier).num_milliseconds();
    (millis as f64 / 3_600_000.0).max(0.0)
}

/// Shared identity and bookkeeping for every stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier (UUID v4 text form).
    pub id: String,
    /// Opaque payload supplied by the caller.
    pub content: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Free-form caller metadata.
    pub metadata: Metadata,
    /// Number of reads that returned this item.
    pub access_count: u64,
    /// Time of the most recent read, if any.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Base importance in `[0, 1]`.
    pub importance: f64,
    /// Exponential decay rate of `importance`, per hour.
    pub decay_rate: f64,
}

impl MemoryItem {
    /// Create an item with a fresh UUID, the current UTC time and default
    /// importance and decay rate.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
            access_count: 0,
            last_accessed: None,
            importance: DEFAULT_IMPORTANCE,
            decay_rate: DEFAULT_DECAY_RATE,
        }
    }

    /// Set the base importance, clamped to `[0, 1]`.
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Set the decay rate (per hour). Negative rates are treated as zero.
    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate.max(0.0);
        self
    }

    /// Override the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The instant decay is measured from: the last access, or creation.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.timestamp)
    }

    /// Hours since the item was last touched, as seen at `now`.
    pub fn hours_since_last_access(&self, now: DateTime<Utc>) -> f64 {
        hours_between(self.reference_time(), now)
    }

    /// Time-decayed, access-boosted importance evaluated at `now`.
    pub fn current_importance_at(&self, now: DateTime<Utc>) -> f64 {
        let hours = self.hours_since_last_access(now);
        let decayed = self.importance * (-self.decay_rate * hours).exp();
        let boost = (self.access_count as f64 * ACCESS_BOOST_STEP).min(MAX_ACCESS_BOOST);
        (decayed + boost).clamp(0.0, 1.0)
    }

    /// Time-decayed, access-boosted importance evaluated now.
    pub fn calculate_current_importance(&self) -> f64 {
        self.current_importance_at(Utc::now())
    }

    /// Record a read: bump the access counter and stamp `last_accessed`.
    pub fn record_access(&mut self) {
        self.record_access_at(Utc::now());
    }

    /// Record a read that happened at `now`.
    pub fn record_access_at(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = Some(now);
    }
}
