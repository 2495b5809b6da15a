//! Vector memory subsystem.
//!
//! Stores [`VectorMemory`] records (a [`MemoryItem`] plus a fixed-dimension
//! vector) and answers top-k similarity queries.
//!
//! # Search paths
//!
//! Queries are served by the configured [`VectorIndex`] once it is trained.
//! Until then (the IVF backend needs `ann_min_training_vectors` stored
//! vectors before its first training pass) new vectors are held un-indexed
//! and every query takes the linear fallback: an exact scan of all stored
//! vectors with a [`SimilarityMetric`].  The fallback also serves queries that
//! ask for a metric other than the configured one, and any query whose index
//! search fails.  Callers cannot tell which path answered except by latency.
//!
//! With the cosine metric, vectors are normalised before they reach the
//! index, so the IVF inner-product score equals the cosine similarity the
//! fallback computes.
//!
//! # Index maintenance
//!
//! Indices are append-only.  Changing a stored vector (directly, or through a
//! content update that forces re-encoding), deleting a memory, or evicting one
//! triggers a full rebuild.  Use [`VectorMemoryManager::update_many`] to pay
//! for one rebuild per batch instead of one per update.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::vector::VectorMemoryManager;
//! use mnemos_types::{MemoryConfiguration, MemoryItem};
//!
//! let cfg = MemoryConfiguration { vector_dimension: 3, ..Default::default() };
//! let vectors = VectorMemoryManager::new(&cfg);
//!
//! let id = vectors
//!     .store(MemoryItem::new("desk", Default::default()), Some(vec![0.1, 0.9, 0.3]))
//!     .unwrap();
//! let hits = vectors.retrieve(&[0.1, 0.9, 0.3], 5, 0.5).unwrap();
//! assert_eq!(hits[0].0.base.id, id);
//! ```

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use mnemos_types::{MemoryConfiguration, MemoryError, MemoryItem, MemoryUpdate, SimilarityMetric};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::encoder::{PlaceholderEncoder, normalize};
use crate::index::{LinearScanIndex, VectorIndex, build_index};

// ─────────────────────────────────────────────────────────────────────────────
// VectorMemory
// ─────────────────────────────────────────────────────────────────────────────

/// How a stored vector was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMethod {
    /// Supplied by the caller (an external embedder).
    Provided,
    /// Derived by the [`PlaceholderEncoder`].
    PlaceholderHash,
}

/// A memory item with its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMemory {
    pub base: MemoryItem,
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub encoding_method: EncodingMethod,
    /// Default retrieval threshold recorded at store time.
    pub similarity_threshold: f64,
}

/// Snapshot of the vector subsystem for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStats {
    pub count: usize,
    pub capacity: usize,
    pub dimension: usize,
    pub index_backend: String,
    pub index_trained: bool,
    pub indexed_count: usize,
    /// Stored vectors not yet in the index (served by the linear fallback).
    pub pending_count: usize,
    pub metric: SimilarityMetric,
    pub average_importance: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// VectorMemoryManager
// ─────────────────────────────────────────────────────────────────────────────

struct VectorState {
    memories: HashMap<String, VectorMemory>,
    index: Box<dyn VectorIndex>,
    indexed: HashSet<String>,
}

/// Thread-safe owner of all vector memories and their index.
///
/// Every public operation holds the manager's lock for its whole duration.
pub struct VectorMemoryManager {
    capacity: usize,
    dimension: usize,
    metric: SimilarityMetric,
    default_threshold: f64,
    encoder: PlaceholderEncoder,
    state: Mutex<VectorState>,
}

impl VectorMemoryManager {
    /// Create a manager with the index backend selected by `config`.
    pub fn new(config: &MemoryConfiguration) -> Self {
        Self::with_index(config, build_index(config))
    }

    /// Create a manager around a caller-supplied index backend.
    pub fn with_index(config: &MemoryConfiguration, index: Box<dyn VectorIndex>) -> Self {
        Self {
            capacity: config.vector_capacity,
            dimension: config.vector_dimension,
            metric: config.similarity_metric,
            default_threshold: config.vector_similarity_threshold,
            encoder: PlaceholderEncoder::new(config.vector_dimension),
            state: Mutex::new(VectorState {
                memories: HashMap::new(),
                index,
                indexed: HashSet::new(),
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode `text` with the placeholder encoder.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        self.encoder.encode(text)
    }

    /// Store `item` with `vector`, or with a placeholder encoding of its
    /// content when no vector is given.  Returns the item id.
    pub fn store(&self, item: MemoryItem, vector: Option<Vec<f32>>) -> Result<String, MemoryError> {
        let (vector, encoding_method) = match vector {
            Some(v) => {
                self.check_dimension(&v)?;
                (v, EncodingMethod::Provided)
            }
            None => (self.encoder.encode(&item.content), EncodingMethod::PlaceholderHash),
        };
        let id = item.id.clone();
        let memory = VectorMemory {
            base: item,
            vector,
            dimension: self.dimension,
            encoding_method,
            similarity_threshold: self.default_threshold,
        };

        let mut state = self.state.lock();
        if state.memories.insert(id.clone(), memory).is_some() {
            // Same id stored twice: the index holds a stale copy.
            self.rebuild_locked(&mut state);
        } else {
            self.index_new_locked(&mut state, &id);
        }
        if self.evict_locked(&mut state) > 0 {
            self.rebuild_locked(&mut state);
        }
        debug!(id = %id, count = state.memories.len(), "stored vector memory");
        Ok(id)
    }

    /// Top-`k` memories scoring at least `threshold` under the configured
    /// metric, most similar first.  Every returned memory is marked accessed.
    pub fn retrieve(&self, query: &[f32], k: usize, threshold: f64) -> Result<Vec<(VectorMemory, f64)>, MemoryError> {
        self.retrieve_with_metric(query, k, threshold, self.metric)
    }

    /// Like [`retrieve`][Self::retrieve] with an explicit metric.  A metric
    /// other than the configured one is always served by the linear scan.
    ///
    /// Index hits only nominate candidates; every returned score is
    /// `metric.score` against the stored vector, trained index or not.
    pub fn retrieve_with_metric(
        &self,
        query: &[f32],
        k: usize,
        threshold: f64,
        metric: SimilarityMetric,
    ) -> Result<Vec<(VectorMemory, f64)>, MemoryError> {
        self.check_dimension(query)?;
        let mut state = self.state.lock();

        let mut scored = None;
        if metric == self.metric && state.index.is_trained() && !state.indexed.is_empty() {
            let probe = self.index_view(query);
            match state.index.search(&probe, k) {
                Ok(hits) => {
                    scored = Some(
                        hits.into_iter()
                            .filter_map(|(id, _)| {
                                let score = metric.score(&state.memories.get(&id)?.vector, query);
                                Some((id, score))
                            })
                            .collect::<Vec<_>>(),
                    )
                }
                Err(e) => warn!(error = %e, backend = state.index.name(), "index search failed; using linear scan"),
            }
        }
        let mut scored = match scored {
            Some(hits) => hits,
            None => state
                .memories
                .values()
                .map(|m| (m.base.id.clone(), metric.score(&m.vector, query)))
                .collect(),
        };

        scored.retain(|(_, score)| *score >= threshold);
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        let now = Utc::now();
        let results = scored
            .into_iter()
            .filter_map(|(id, score)| {
                let memory = state.memories.get_mut(&id)?;
                memory.base.record_access_at(now);
                Some((memory.clone(), score))
            })
            .collect::<Vec<_>>();
        debug!(k, threshold, hits = results.len(), "vector retrieve");
        Ok(results)
    }

    /// Encode `text` with the placeholder encoder and retrieve against it.
    pub fn retrieve_text(&self, text: &str, k: usize, threshold: f64) -> Result<Vec<(VectorMemory, f64)>, MemoryError> {
        let query = self.encoder.encode(text);
        self.retrieve(&query, k, threshold)
    }

    /// Clone of the memory stored under `id`, without marking it accessed.
    pub fn get(&self, id: &str) -> Option<VectorMemory> {
        self.state.lock().memories.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().memories.contains_key(id)
    }

    /// Apply `update` (and optionally a replacement vector) to `id`.
    ///
    /// Returns `Ok(false)` for unknown ids.  A content change without a new
    /// vector re-encodes with the placeholder encoder; any vector change
    /// rebuilds the index.
    pub fn update(&self, id: &str, update: &MemoryUpdate, vector: Option<Vec<f32>>) -> Result<bool, MemoryError> {
        if let Some(v) = &vector {
            self.check_dimension(v)?;
        }
        let mut state = self.state.lock();
        let Some(found) = self.apply_update_locked(&mut state, id, update, vector) else {
            return Ok(false);
        };
        if found {
            self.rebuild_locked(&mut state);
        }
        Ok(true)
    }

    /// Apply a batch of updates with at most one index rebuild.
    ///
    /// Returns the number of ids that existed and were updated.
    pub fn update_many(&self, updates: Vec<(String, MemoryUpdate)>) -> usize {
        let mut state = self.state.lock();
        let mut updated = 0;
        let mut needs_rebuild = false;
        for (id, update) in updates {
            if let Some(vector_changed) = self.apply_update_locked(&mut state, &id, &update, None) {
                updated += 1;
                needs_rebuild |= vector_changed;
            }
        }
        if needs_rebuild {
            self.rebuild_locked(&mut state);
        }
        updated
    }

    /// Remove `id`.  Returns `false` if it was not stored.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        if state.memories.remove(id).is_none() {
            return false;
        }
        self.rebuild_locked(&mut state);
        debug!(id = %id, "deleted vector memory");
        true
    }

    /// Remove every memory and reset the index to empty and untrained.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.memories.clear();
        state.index.reset();
        state.indexed.clear();
        info!("cleared vector memory");
    }

    /// Force a full index rebuild.
    pub fn rebuild_index(&self) {
        let mut state = self.state.lock();
        self.rebuild_locked(&mut state);
    }

    pub fn len(&self) -> usize {
        self.state.lock().memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> VectorStats {
        let state = self.state.lock();
        let now = Utc::now();
        let count = state.memories.len();
        let average_importance = if count == 0 {
            0.0
        } else {
            state.memories.values().map(|m| m.base.current_importance_at(now)).sum::<f64>() / count as f64
        };
        VectorStats {
            count,
            capacity: self.capacity,
            dimension: self.dimension,
            index_backend: state.index.name().to_string(),
            index_trained: state.index.is_trained(),
            indexed_count: state.indexed.len(),
            pending_count: count.saturating_sub(state.indexed.len()),
            metric: self.metric,
            average_importance,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers (caller holds the lock)
    // ─────────────────────────────────────────────────────────────────────────

    fn check_dimension(&self, vector: &[f32]) -> Result<(), MemoryError> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch { expected: self.dimension, actual: vector.len() });
        }
        Ok(())
    }

    fn index_view(&self, vector: &[f32]) -> Vec<f32> {
        let mut v = vector.to_vec();
        if self.metric == SimilarityMetric::Cosine {
            normalize(&mut v);
        }
        v
    }

    /// `None` when `id` is unknown, otherwise whether the vector changed.
    fn apply_update_locked(
        &self,
        state: &mut VectorState,
        id: &str,
        update: &MemoryUpdate,
        vector: Option<Vec<f32>>,
    ) -> Option<bool> {
        let memory = state.memories.get_mut(id)?;
        let content_changed = update.apply_to(&mut memory.base);
        let vector_changed = match vector {
            Some(v) => {
                memory.vector = v;
                memory.encoding_method = EncodingMethod::Provided;
                true
            }
            None if content_changed => {
                memory.vector = self.encoder.encode(&memory.base.content);
                memory.encoding_method = EncodingMethod::PlaceholderHash;
                true
            }
            None => false,
        };
        debug!(id = %id, vector_changed, "updated vector memory");
        Some(vector_changed)
    }

    fn index_new_locked(&self, state: &mut VectorState, id: &str) {
        if state.index.is_trained() {
            let view = self.index_view(&state.memories[id].vector);
            match state.index.add(id, &view) {
                Ok(()) => {
                    state.indexed.insert(id.to_string());
                }
                Err(e) => warn!(id = %id, error = %e, "failed to index vector; it stays searchable by linear scan"),
            }
        } else if state.memories.len() >= state.index.min_training_size() {
            self.train_and_fill_locked(state);
        }
    }

    fn rebuild_locked(&self, state: &mut VectorState) {
        state.index.reset();
        state.indexed.clear();
        if state.memories.len() >= state.index.min_training_size() && !state.memories.is_empty() {
            self.train_and_fill_locked(state);
        }
    }

    fn train_and_fill_locked(&self, state: &mut VectorState) {
        let views: Vec<(String, Vec<f32>)> = state
            .memories
            .values()
            .map(|m| (m.base.id.clone(), self.index_view(&m.vector)))
            .collect();
        let refs: Vec<&[f32]> = views.iter().map(|(_, v)| v.as_slice()).collect();

        if let Err(e) = state.index.train(&refs) {
            warn!(error = %e, backend = state.index.name(), "index training failed; switching to linear scan");
            state.index = Box::new(LinearScanIndex::new(self.dimension, self.metric));
        }
        state.indexed.clear();
        for (id, view) in &views {
            match state.index.add(id, view) {
                Ok(()) => {
                    state.indexed.insert(id.clone());
                }
                Err(e) => warn!(id = %id, error = %e, "failed to index vector during rebuild"),
            }
        }
        info!(backend = state.index.name(), indexed = state.indexed.len(), "vector index trained");
    }

    /// Drop the least important (then oldest) memories beyond capacity.
    fn evict_locked(&self, state: &mut VectorState) -> usize {
        let excess = state.memories.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }
        let now = Utc::now();
        let mut ranked: Vec<(f64, chrono::DateTime<Utc>, String)> = state
            .memories
            .values()
            .map(|m| (m.base.current_importance_at(now), m.base.timestamp, m.base.id.clone()))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, _, id) in ranked.into_iter().take(excess) {
            state.memories.remove(&id);
            debug!(id = %id, "evicted vector memory");
        }
        info!(evicted = excess, capacity = self.capacity, "vector capacity eviction");
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_types::{Metadata, VectorIndexKind};

    fn config(dimension: usize) -> MemoryConfiguration {
        MemoryConfiguration { vector_dimension: dimension, ..Default::default() }
    }

    fn item(content: &str) -> MemoryItem {
        MemoryItem::new(content, Metadata::new())
    }

    // ── store ────────────────────────────────────────────────────────────────

    #[test]
    fn store_without_vector_uses_placeholder_encoding() {
        let mgr = VectorMemoryManager::new(&config(16));
        let id = mgr.store(item("hello"), None).unwrap();
        let stored = mgr.get(&id).unwrap();
        assert_eq!(stored.encoding_method, EncodingMethod::PlaceholderHash);
        assert_eq!(stored.vector.len(), 16);
        assert_eq!(stored.vector, mgr.encode("hello"));
    }

    #[test]
    fn store_rejects_wrong_dimension() {
        let mgr = VectorMemoryManager::new(&config(3));
        let err = mgr.store(item("x"), Some(vec![1.0, 0.0])).unwrap_err();
        assert_eq!(err, MemoryError::DimensionMismatch { expected: 3, actual: 2 });
        assert!(mgr.is_empty());
    }

    // ── retrieve ─────────────────────────────────────────────────────────────

    #[test]
    fn retrieve_returns_best_match_first() {
        let mgr = VectorMemoryManager::new(&config(3));
        let near = mgr.store(item("near"), Some(vec![1.0, 0.0, 0.0])).unwrap();
        mgr.store(item("mid"), Some(vec![0.7, 0.7, 0.0])).unwrap();
        mgr.store(item("far"), Some(vec![0.0, 0.0, 1.0])).unwrap();

        let hits = mgr.retrieve(&[1.0, 0.0, 0.0], 5, 0.0).unwrap();
        assert_eq!(hits[0].0.base.id, near);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn retrieve_never_returns_scores_below_threshold() {
        let mgr = VectorMemoryManager::new(&config(2));
        mgr.store(item("a"), Some(vec![1.0, 0.0])).unwrap();
        mgr.store(item("b"), Some(vec![0.6, 0.8])).unwrap();
        mgr.store(item("c"), Some(vec![0.0, 1.0])).unwrap();

        let hits = mgr.retrieve(&[1.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(_, s)| *s >= 0.5));
    }

    #[test]
    fn retrieve_limits_to_k_and_bumps_access() {
        let mgr = VectorMemoryManager::new(&config(2));
        for i in 0..5 {
            mgr.store(item(&format!("m{i}")), Some(vec![1.0, i as f32 * 0.1])).unwrap();
        }
        let hits = mgr.retrieve(&[1.0, 0.0], 3, 0.0).unwrap();
        assert_eq!(hits.len(), 3);
        for (memory, _) in &hits {
            assert_eq!(mgr.get(&memory.base.id).unwrap().base.access_count, 1);
        }
    }

    #[test]
    fn retrieve_with_alternate_metric_uses_linear_scan() {
        let mgr = VectorMemoryManager::new(&config(2));
        let id = mgr.store(item("a"), Some(vec![2.0, 0.0])).unwrap();
        let hits = mgr
            .retrieve_with_metric(&[2.0, 0.0], 1, 0.9, SimilarityMetric::Euclidean)
            .unwrap();
        assert_eq!(hits[0].0.base.id, id);
        assert!((hits[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn retrieve_text_matches_identical_content() {
        let mgr = VectorMemoryManager::new(&config(64));
        let id = mgr.store(item("credit limit increased"), None).unwrap();
        mgr.store(item("weather is sunny"), None).unwrap();
        let hits = mgr.retrieve_text("credit limit increased", 1, 0.9).unwrap();
        assert_eq!(hits[0].0.base.id, id);
    }

    #[test]
    fn retrieve_rejects_wrong_query_dimension() {
        let mgr = VectorMemoryManager::new(&config(4));
        assert!(matches!(
            mgr.retrieve(&[1.0], 1, 0.0),
            Err(MemoryError::DimensionMismatch { .. })
        ));
    }

    // ── index lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn vectors_stay_pending_until_training_size_is_reached() {
        let cfg = MemoryConfiguration { vector_dimension: 16, ann_min_training_vectors: 100, ..Default::default() };
        let mgr = VectorMemoryManager::new(&cfg);
        for i in 0..99 {
            mgr.store(item(&format!("memory {i}")), None).unwrap();
        }
        let stats = mgr.stats();
        assert!(!stats.index_trained);
        assert_eq!(stats.pending_count, 99);

        // Untrained: still searchable through the fallback.
        let hits = mgr.retrieve_text("memory 7", 1, 0.99).unwrap();
        assert_eq!(hits[0].0.base.content, "memory 7");

        mgr.store(item("memory 99"), None).unwrap();
        let stats = mgr.stats();
        assert!(stats.index_trained);
        assert_eq!(stats.indexed_count, 100);
        assert_eq!(stats.pending_count, 0);

        let hits = mgr.retrieve_text("memory 42", 1, 0.99).unwrap();
        assert_eq!(hits[0].0.base.content, "memory 42");
    }

    #[test]
    fn trained_index_gets_new_vectors_incrementally() {
        let cfg = MemoryConfiguration { vector_dimension: 8, ann_min_training_vectors: 4, ann_list_count: 2, ..Default::default() };
        let mgr = VectorMemoryManager::new(&cfg);
        for i in 0..6 {
            mgr.store(item(&format!("entry {i}")), None).unwrap();
        }
        let stats = mgr.stats();
        assert!(stats.index_trained);
        assert_eq!(stats.indexed_count, 6);
    }

    #[test]
    fn scores_follow_configured_metric_across_training() {
        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::Euclidean,
            SimilarityMetric::Manhattan,
            SimilarityMetric::DotProduct,
        ] {
            let cfg = MemoryConfiguration {
                vector_dimension: 2,
                similarity_metric: metric,
                ann_min_training_vectors: 3,
                ann_list_count: 1,
                ann_probe_count: 1,
                ..Default::default()
            };
            let mgr = VectorMemoryManager::new(&cfg);
            let a = mgr.store(item("a"), Some(vec![0.5, 0.0])).unwrap();
            mgr.store(item("b"), Some(vec![0.0, 0.5])).unwrap();
            let query = [0.5, 0.0];
            let scores = |mgr: &VectorMemoryManager| -> Vec<(String, f64)> {
                mgr.retrieve(&query, 2, 0.0).unwrap().into_iter().map(|(m, s)| (m.base.id, s)).collect()
            };

            let before = scores(&mgr);
            mgr.store(item("c"), Some(vec![-0.5, -0.5])).unwrap();
            assert!(mgr.stats().index_trained, "{metric:?}");
            let after = scores(&mgr);

            assert_eq!(before, after, "{metric:?}");
            assert_eq!(after[0].0, a);
            assert!((after[0].1 - metric.score(&[0.5, 0.0], &query)).abs() < 1e-9, "{metric:?}");
        }
    }

    #[test]
    fn euclidean_identical_vector_scores_one_after_training() {
        let cfg = MemoryConfiguration {
            vector_dimension: 2,
            similarity_metric: SimilarityMetric::Euclidean,
            ann_min_training_vectors: 2,
            ann_list_count: 1,
            ann_probe_count: 1,
            ..Default::default()
        };
        let mgr = VectorMemoryManager::new(&cfg);
        let a = mgr.store(item("a"), Some(vec![0.5, 0.0])).unwrap();
        mgr.store(item("b"), Some(vec![0.0, 0.5])).unwrap();
        assert_eq!(mgr.stats().index_backend, "ivf_flat");

        let hits = mgr.retrieve(&[0.5, 0.0], 2, 0.0).unwrap();
        assert_eq!(hits[0].0.base.id, a);
        assert!((hits[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn clear_resets_index_to_untrained() {
        let cfg = MemoryConfiguration { vector_dimension: 8, ann_min_training_vectors: 2, ..Default::default() };
        let mgr = VectorMemoryManager::new(&cfg);
        mgr.store(item("a"), None).unwrap();
        mgr.store(item("b"), None).unwrap();
        assert!(mgr.stats().index_trained);
        mgr.clear();
        let stats = mgr.stats();
        assert_eq!(stats.count, 0);
        assert!(!stats.index_trained);
    }

    #[test]
    fn linear_backend_is_always_trained() {
        let cfg = MemoryConfiguration { vector_dimension: 4, vector_index: VectorIndexKind::Linear, ..Default::default() };
        let mgr = VectorMemoryManager::new(&cfg);
        mgr.store(item("only"), None).unwrap();
        let stats = mgr.stats();
        assert_eq!(stats.index_backend, "linear");
        assert!(stats.index_trained);
        assert_eq!(stats.indexed_count, 1);
    }

    // ── update / delete ──────────────────────────────────────────────────────

    #[test]
    fn content_update_reencodes_vector() {
        let mgr = VectorMemoryManager::new(&config(16));
        let id = mgr.store(item("before"), None).unwrap();
        assert!(mgr.update(&id, &MemoryUpdate::content("after"), None).unwrap());
        let stored = mgr.get(&id).unwrap();
        assert_eq!(stored.vector, mgr.encode("after"));
    }

    #[test]
    fn update_unknown_id_returns_false() {
        let mgr = VectorMemoryManager::new(&config(4));
        assert!(!mgr.update("missing", &MemoryUpdate::importance(0.9), None).unwrap());
    }

    #[test]
    fn update_many_counts_existing_ids() {
        let mgr = VectorMemoryManager::new(&config(8));
        let a = mgr.store(item("a"), None).unwrap();
        let b = mgr.store(item("b"), None).unwrap();
        let updated = mgr.update_many(vec![
            (a.clone(), MemoryUpdate::content("a2")),
            (b, MemoryUpdate::importance(0.9)),
            ("ghost".to_string(), MemoryUpdate::importance(0.1)),
        ]);
        assert_eq!(updated, 2);
        assert_eq!(mgr.get(&a).unwrap().base.content, "a2");
    }

    #[test]
    fn delete_twice_reports_not_found_second_time() {
        let mgr = VectorMemoryManager::new(&config(4));
        let id = mgr.store(item("x"), None).unwrap();
        assert!(mgr.delete(&id));
        assert!(!mgr.delete(&id));
        assert!(mgr.retrieve_text("x", 5, 0.0).unwrap().is_empty());
    }

    // ── eviction ─────────────────────────────────────────────────────────────

    #[test]
    fn capacity_eviction_drops_least_important() {
        let cfg = MemoryConfiguration { vector_capacity: 3, vector_dimension: 8, ..Default::default() };
        let mgr = VectorMemoryManager::new(&cfg);
        let ids: Vec<String> = [0.2, 0.4, 0.6, 0.8]
            .iter()
            .enumerate()
            .map(|(i, imp)| mgr.store(item(&format!("item {i}")).with_importance(*imp), None).unwrap())
            .collect();

        assert_eq!(mgr.len(), 3);
        assert!(mgr.get(&ids[0]).is_none());
        for id in &ids[1..] {
            let stored = mgr.get(id).unwrap();
            let hits = mgr.retrieve(&stored.vector, 1, 0.99).unwrap();
            assert_eq!(&hits[0].0.base.id, id);
        }
    }
}
