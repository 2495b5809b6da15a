//! `mnemos-runtime` – the hybrid memory coordinator.
//!
//! Ties the four subsystems of `mnemos-memory` together behind one API.
//!
//! # Modules
//!
//! - [`hybrid`] – [`HybridMemorySystem`]: routed multi-subsystem stores,
//!   parallel (or sequential) retrieval with per-subsystem timeouts and
//!   failure isolation, fan-out update and delete, engine statistics.
//! - [`consolidation`] – promotion of important working items into
//!   long-term memory, on demand or automatically after stores.
//! - [`cross_links`] – [`CrossConnectionIndex`]: symmetric weighted links
//!   between `(subsystem, id)` references.
//! - [`routing`] – [`classify`] plus the [`StoreHints`] / [`RetrieveHints`]
//!   carried by each call.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] for hosts
//!   without their own `tracing` subscriber.

pub mod consolidation;
pub mod cross_links;
pub mod hybrid;
pub mod routing;
pub mod telemetry;

pub use consolidation::{ConsolidatedItem, ConsolidationReport};
pub use cross_links::{CrossConnectionIndex, CrossConnectionStats, MemoryRef};
pub use hybrid::{HybridMemoryResult, HybridMemorySystem, HybridStats, StoreReport};
pub use routing::{MemoryTarget, RelationshipHint, RetrieveHints, StoreHints, classify};
pub use telemetry::init_tracing;
