//! `mnemos-memory` – the four storage subsystems.
//!
//! Each manager owns its data behind one `parking_lot::Mutex` and is safe to
//! share between threads.  Eviction runs inline, on the thread whose store
//! pushed the subsystem over capacity.
//!
//! # Modules
//!
//! - [`vector`] – [`VectorMemoryManager`]: fixed-dimension vectors with
//!   top-k similarity search, served by a [`VectorIndex`][index::VectorIndex]
//!   or the exact linear fallback.
//! - [`index`] – the index trait plus the bundled IVF-flat and linear-scan
//!   backends.
//! - [`encoder`] – the deterministic placeholder text encoder.
//! - [`episodic`] – [`EpisodicMemoryManager`]: timestamped episodes, temporal
//!   and contextual queries, recurring-pattern detection.
//! - [`semantic`] – [`SemanticMemoryManager`]: concept nodes and typed
//!   relationships with auto-linking, path-finding and clustering, built on
//!   [`graph`].
//! - [`working`] – [`WorkingMemoryManager`]: prioritised, activation-decayed
//!   short-term items with auto-clustering.

pub mod encoder;
pub mod episodic;
pub mod graph;
pub mod index;
pub mod semantic;
pub mod vector;
pub mod working;

pub use encoder::PlaceholderEncoder;
pub use episodic::{EpisodeMemory, EpisodicMemoryManager, EpisodicStats, Sequence};
pub use graph::ConceptGraph;
pub use index::{IndexMetric, IvfFlatIndex, LinearScanIndex, VectorIndex};
pub use semantic::{SemanticEdge, SemanticMemoryManager, SemanticNode, SemanticStats};
pub use vector::{EncodingMethod, VectorMemory, VectorMemoryManager, VectorStats};
pub use working::{WorkingMemoryCluster, WorkingMemoryItem, WorkingMemoryManager, WorkingStats};
