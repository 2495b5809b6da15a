//! Hybrid memory coordinator.
//!
//! [`HybridMemorySystem`] owns one manager per subsystem plus the
//! [`CrossConnectionIndex`], and exposes the engine's caller API.
//!
//! # Store
//!
//! A store writes one logical item (one id) to every targeted subsystem.
//! Writes are independent: a failing subsystem is logged and reported in
//! [`StoreReport::failures`] while the others keep the item.  There is no
//! rollback.  When two or more subsystems accepted the item, every pair of
//! `(subsystem, id)` references is cross-connected.
//!
//! # Retrieve
//!
//! A query fans out to the requested subsystems, either inline
//! (`parallel_queries = false`) or as one blocking task per subsystem on a
//! pool bounded by `max_worker_threads`.  Each task has its own
//! `query_timeout_ms`; a subsystem that fails or times out contributes
//! nothing and is listed in [`HybridMemoryResult::failures`].  A timed-out
//! task is not cancelled, only abandoned.
//!
//! ```text
//! confidence = 0.3 · min(1, results / 5)
//!            + 0.3 · subsystems_with_results / 4
//!            + 0.2 · min(1, cross_connections / 10)
//!            + 0.2 · mean working activation
//! ```
//!
//! # Example
//!
//! ```rust
//! use mnemos_runtime::{HybridMemorySystem, MemoryTarget, RetrieveHints, StoreHints};
//! use mnemos_types::{MemoryConfiguration, Query};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cfg = MemoryConfiguration { vector_dimension: 64, ..Default::default() };
//! let memory = HybridMemorySystem::new(cfg).unwrap();
//!
//! let hints = StoreHints { triggers: vec!["login_failure".into()], ..Default::default() };
//! let report = memory
//!     .store("password rejected for alice", Default::default(), MemoryTarget::Auto, hints)
//!     .unwrap();
//! assert_eq!(report.written.len(), 2);
//!
//! let result = memory
//!     .retrieve(Query::text("login_failure"), 5, None, true, RetrieveHints::default())
//!     .await;
//! assert_eq!(result.episodic[0].0.base.id, report.id);
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use mnemos_memory::{
    EpisodeMemory, EpisodicMemoryManager, EpisodicStats, SemanticMemoryManager, SemanticNode, SemanticStats,
    VectorIndex, VectorMemory, VectorMemoryManager, VectorStats, WorkingMemoryItem, WorkingMemoryManager,
    WorkingStats, index::build_index,
};
use mnemos_types::{MemoryConfiguration, MemoryError, MemoryItem, MemoryType, MemoryUpdate, Metadata, Query};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::cross_links::{CrossConnectionIndex, CrossConnectionStats, MemoryRef};
use crate::routing::{DEFAULT_WORKING_PRIORITY, MemoryTarget, RetrieveHints, StoreHints, TIMESTAMP_KEY, classify};

/// Strength of links between co-stored references.
const CO_STORED_LINK_STRENGTH: f64 = 1.0;
/// Default category for semantic nodes stored without one.
const DEFAULT_CATEGORY: &str = "general";

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of [`HybridMemorySystem::store`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreReport {
    /// Id shared by every written reference.
    pub id: String,
    pub written: Vec<MemoryRef>,
    pub failures: Vec<(MemoryType, MemoryError)>,
    /// Cross-connections created between the written references.
    pub cross_connections: usize,
}

impl StoreReport {
    /// `true` when at least one targeted subsystem rejected the item.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Outcome of [`HybridMemorySystem::retrieve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridMemoryResult {
    pub vector: Vec<(VectorMemory, f64)>,
    pub episodic: Vec<(EpisodeMemory, f64)>,
    pub semantic: Vec<SemanticNode>,
    pub working: Vec<(WorkingMemoryItem, f64)>,
    /// `"type:id"` of each returned item → `"type:id"` of its links.
    pub cross_connections: BTreeMap<String, Vec<String>>,
    pub confidence_score: f64,
    pub query_time: Duration,
    /// Subsystems that returned at least one item.
    pub types_used: Vec<MemoryType>,
    /// Subsystems that failed or timed out.
    pub failures: Vec<(MemoryType, MemoryError)>,
}

impl HybridMemoryResult {
    pub fn total_results(&self) -> usize {
        self.vector.len() + self.episodic.len() + self.semantic.len() + self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_results() == 0
    }

    /// References of every returned item.
    pub fn refs(&self) -> Vec<MemoryRef> {
        let vector = self.vector.iter().map(|(m, _)| MemoryRef::new(MemoryType::Vector, &m.base.id));
        let episodic = self.episodic.iter().map(|(e, _)| MemoryRef::new(MemoryType::Episodic, &e.base.id));
        let semantic = self.semantic.iter().map(|n| MemoryRef::new(MemoryType::Semantic, &n.base.id));
        let working = self.working.iter().map(|(w, _)| MemoryRef::new(MemoryType::Working, &w.base.id));
        vector.chain(episodic).chain(semantic).chain(working).collect()
    }

    fn cross_connection_count(&self) -> usize {
        self.cross_connections.values().map(Vec::len).sum()
    }

    fn compute_confidence(&self) -> f64 {
        let results = (self.total_results() as f64 / 5.0).min(1.0);
        let types = self.types_used.len() as f64 / MemoryType::ALL.len() as f64;
        let links = (self.cross_connection_count() as f64 / 10.0).min(1.0);
        let activation = if self.working.is_empty() {
            0.0
        } else {
            self.working.iter().map(|(w, _)| w.activation_level).sum::<f64>() / self.working.len() as f64
        };
        0.3 * results + 0.3 * types + 0.2 * links + 0.2 * activation
    }
}

/// Engine-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridStats {
    pub vector: VectorStats,
    pub episodic: EpisodicStats,
    pub semantic: SemanticStats,
    pub working: WorkingStats,
    pub cross_connections: CrossConnectionStats,
    /// Working ids awaiting the next consolidation pass.
    pub pending_consolidation: usize,
    pub last_consolidation: DateTime<Utc>,
    pub parallel_queries: bool,
    pub max_worker_threads: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// HybridMemorySystem
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct Subsystems {
    pub(crate) vector: Arc<VectorMemoryManager>,
    pub(crate) episodic: Arc<EpisodicMemoryManager>,
    pub(crate) semantic: Arc<SemanticMemoryManager>,
    pub(crate) working: Arc<WorkingMemoryManager>,
}

pub(crate) struct Coordination {
    pub(crate) candidates: HashSet<String>,
    pub(crate) last_consolidation: DateTime<Utc>,
}

enum SubsystemHits {
    Vector(Vec<(VectorMemory, f64)>),
    Episodic(Vec<(EpisodeMemory, f64)>),
    Semantic(Vec<SemanticNode>),
    Working(Vec<(WorkingMemoryItem, f64)>),
}

/// Coordinator over the four memory subsystems.
pub struct HybridMemorySystem {
    pub(crate) config: MemoryConfiguration,
    pub(crate) subsystems: Subsystems,
    pub(crate) cross_links: Mutex<CrossConnectionIndex>,
    pub(crate) coordination: Mutex<Coordination>,
    workers: Arc<Semaphore>,
}

impl HybridMemorySystem {
    /// Build every subsystem from a validated `config`.
    pub fn new(config: MemoryConfiguration) -> Result<Self, MemoryError> {
        let index = build_index(&config);
        Self::with_vector_index(config, index)
    }

    /// Like [`new`][Self::new] with a caller-supplied vector index backend.
    pub fn with_vector_index(config: MemoryConfiguration, index: Box<dyn VectorIndex>) -> Result<Self, MemoryError> {
        config.validate()?;
        info!(
            vector_dimension = config.vector_dimension,
            index = index.name(),
            parallel_queries = config.parallel_queries,
            workers = config.max_worker_threads,
            "initialising hybrid memory"
        );
        Ok(Self {
            subsystems: Subsystems {
                vector: Arc::new(VectorMemoryManager::with_index(&config, index)),
                episodic: Arc::new(EpisodicMemoryManager::new(config.episodic_capacity)),
                semantic: Arc::new(SemanticMemoryManager::new(config.semantic_capacity, config.semantic_edge_capacity)),
                working: Arc::new(WorkingMemoryManager::new(
                    config.working_capacity,
                    config.working_cluster_capacity,
                    config.working_activation_boost,
                )),
            },
            cross_links: Mutex::new(CrossConnectionIndex::from_config(&config)),
            coordination: Mutex::new(Coordination { candidates: HashSet::new(), last_consolidation: Utc::now() }),
            workers: Arc::new(Semaphore::new(config.max_worker_threads)),
            config,
        })
    }

    pub fn config(&self) -> &MemoryConfiguration {
        &self.config
    }

    pub fn vector(&self) -> &VectorMemoryManager {
        &self.subsystems.vector
    }

    pub fn episodic(&self) -> &EpisodicMemoryManager {
        &self.subsystems.episodic
    }

    pub fn semantic(&self) -> &SemanticMemoryManager {
        &self.subsystems.semantic
    }

    pub fn working(&self) -> &WorkingMemoryManager {
        &self.subsystems.working
    }

    /// Links of `node`, strongest first.
    pub fn cross_connections(&self, node: &MemoryRef) -> Vec<(MemoryRef, f64)> {
        self.cross_links.lock().connections_of(node)
    }

    // ── store ────────────────────────────────────────────────────────────────

    /// Store `content` in the subsystems selected by `target`.
    ///
    /// Fails with [`MemoryError::StoreFailed`] only when every targeted
    /// subsystem rejected the item; partial failures are reported in the
    /// returned [`StoreReport`].
    pub fn store(
        &self,
        content: impl Into<String>,
        mut metadata: Metadata,
        target: MemoryTarget,
        hints: StoreHints,
    ) -> Result<StoreReport, MemoryError> {
        let targets: BTreeSet<MemoryType> = match target {
            MemoryTarget::Auto => classify(&metadata, &hints),
            MemoryTarget::Only(types) => types,
        };
        if targets.is_empty() {
            return Err(MemoryError::InvalidConfiguration("store target names no subsystem".to_string()));
        }
        if let Some(ts) = hints.timestamp {
            metadata
                .entry(TIMESTAMP_KEY.to_string())
                .or_insert_with(|| serde_json::Value::String(ts.to_rfc3339()));
        }

        let mut base = MemoryItem::new(content, metadata);
        if let Some(importance) = hints.importance {
            base = base.with_importance(importance);
        }
        let id = base.id.clone();

        let mut written = Vec::new();
        let mut failures = Vec::new();
        for memory_type in targets {
            match self.store_in(memory_type, &base, &hints, &mut failures) {
                Ok(()) => written.push(MemoryRef::new(memory_type, &id)),
                Err(e) => {
                    warn!(subsystem = %memory_type, id = %id, error = %e, "store failed in subsystem");
                    failures.push((memory_type, e));
                }
            }
        }

        if written.is_empty() {
            let details = failures
                .iter()
                .map(|(t, e)| format!("{t}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(MemoryError::StoreFailed(details));
        }

        let cross_connections = if written.len() >= 2 && self.config.enable_cross_connections {
            self.cross_links.lock().connect_all(&written, CO_STORED_LINK_STRENGTH)
        } else {
            0
        };

        let wrote_working = written.iter().any(|r| r.memory_type == MemoryType::Working);
        debug!(id = %id, written = written.len(), failed = failures.len(), "hybrid store");
        let report = StoreReport { id, written, failures, cross_connections };

        if wrote_working {
            self.coordination.lock().candidates.insert(report.id.clone());
            self.maybe_auto_consolidate();
        }
        Ok(report)
    }

    fn store_in(
        &self,
        memory_type: MemoryType,
        base: &MemoryItem,
        hints: &StoreHints,
        failures: &mut Vec<(MemoryType, MemoryError)>,
    ) -> Result<(), MemoryError> {
        match memory_type {
            MemoryType::Vector => {
                self.subsystems.vector.store(base.clone(), hints.vector.clone())?;
            }
            MemoryType::Episodic => {
                let mut episode_base = base.clone();
                if let Some(ts) = hints.timestamp.or_else(|| metadata_timestamp(&base.metadata)) {
                    episode_base = episode_base.with_timestamp(ts);
                }
                let mut episode = EpisodeMemory::new(episode_base)
                    .with_context(hints.context.clone().unwrap_or_default())
                    .with_triggers(hints.triggers.iter().cloned())
                    .with_outcomes(hints.outcomes.iter().cloned());
                if let Some(duration) = hints.duration {
                    episode = episode.with_duration(duration);
                }
                if let Some(valence) = hints.emotional_valence {
                    episode = episode.with_emotional_valence(valence);
                }
                self.subsystems.episodic.store(episode);
            }
            MemoryType::Semantic => {
                let concept = hints.concept.clone().unwrap_or_else(|| base.content.clone());
                let category = hints.category.clone().unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
                let node = SemanticNode::new(base.clone(), concept, category)
                    .with_attributes(hints.attributes.clone().unwrap_or_default())
                    .with_confidence(hints.confidence.unwrap_or(1.0))
                    .with_source(hints.source.clone().unwrap_or_else(|| "hybrid".to_string()));
                let id = self.subsystems.semantic.store(node);
                for rel in &hints.relationships {
                    if let Err(e) = self.subsystems.semantic.add_relationship(
                        &id,
                        &rel.target,
                        &rel.relationship_type,
                        rel.strength,
                        rel.bidirectional,
                    ) {
                        warn!(id = %id, target = %rel.target, error = %e, "relationship hint rejected");
                        failures.push((MemoryType::Semantic, e));
                    }
                }
            }
            MemoryType::Working => {
                let item = WorkingMemoryItem::new(base.clone(), hints.priority.unwrap_or(DEFAULT_WORKING_PRIORITY))
                    .with_context_tags(hints.context_tags.iter().cloned())
                    .with_dependencies(hints.dependencies.iter().cloned());
                self.subsystems.working.store(item);
            }
        }
        Ok(())
    }

    fn maybe_auto_consolidate(&self) {
        let due = {
            let coordination = self.coordination.lock();
            let elapsed = (Utc::now() - coordination.last_consolidation).to_std().unwrap_or_default();
            coordination.candidates.len() >= self.config.consolidation_batch_size
                || elapsed >= self.config.consolidation_interval()
        };
        if due {
            let report = self.consolidate_memories(None);
            info!(consolidated = report.consolidated.len(), failed = report.failed.len(), "automatic consolidation");
        }
    }

    // ── retrieve ─────────────────────────────────────────────────────────────

    /// Query the subsystems in `memory_types` (all when `None`).
    ///
    /// Never fails as a whole: subsystem failures and timeouts are listed in
    /// [`HybridMemoryResult::failures`].
    #[instrument(level = "debug", skip_all, fields(k = k, parallel = self.config.parallel_queries))]
    pub async fn retrieve(
        &self,
        query: Query,
        k: usize,
        memory_types: Option<&[MemoryType]>,
        include_cross_connections: bool,
        hints: RetrieveHints,
    ) -> HybridMemoryResult {
        let started = Instant::now();
        let types: Vec<MemoryType> = match memory_types {
            Some(types) => types.iter().copied().collect::<BTreeSet<_>>().into_iter().collect(),
            None => MemoryType::ALL.to_vec(),
        };

        let outcomes: Vec<(MemoryType, Result<SubsystemHits, MemoryError>)> = if self.config.parallel_queries {
            self.retrieve_parallel(&types, &query, k, &hints).await
        } else {
            types
                .iter()
                .map(|&t| (t, query_subsystem(&self.subsystems, t, &query, k, &hints, self.config.vector_similarity_threshold)))
                .collect()
        };

        let mut result = HybridMemoryResult::default();
        for (memory_type, outcome) in outcomes {
            match outcome {
                Ok(SubsystemHits::Vector(hits)) => result.vector = hits,
                Ok(SubsystemHits::Episodic(hits)) => result.episodic = hits,
                Ok(SubsystemHits::Semantic(hits)) => result.semantic = hits,
                Ok(SubsystemHits::Working(hits)) => result.working = hits,
                Err(e) => {
                    warn!(subsystem = %memory_type, error = %e, "retrieve failed in subsystem");
                    result.failures.push((memory_type, e));
                }
            }
        }

        result.types_used = [
            (MemoryType::Vector, result.vector.len()),
            (MemoryType::Episodic, result.episodic.len()),
            (MemoryType::Semantic, result.semantic.len()),
            (MemoryType::Working, result.working.len()),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(t, _)| t)
        .collect();

        if include_cross_connections {
            let links = self.cross_links.lock();
            for node in result.refs() {
                let connected: Vec<String> = links.connections_of(&node).into_iter().map(|(r, _)| r.to_string()).collect();
                if !connected.is_empty() {
                    result.cross_connections.insert(node.to_string(), connected);
                }
            }
        }

        result.confidence_score = result.compute_confidence();
        result.query_time = started.elapsed();
        debug!(
            results = result.total_results(),
            failures = result.failures.len(),
            confidence = result.confidence_score,
            elapsed_ms = result.query_time.as_millis() as u64,
            "hybrid retrieve"
        );
        result
    }

    async fn retrieve_parallel(
        &self,
        types: &[MemoryType],
        query: &Query,
        k: usize,
        hints: &RetrieveHints,
    ) -> Vec<(MemoryType, Result<SubsystemHits, MemoryError>)> {
        let timeout = self.config.query_timeout();
        let threshold = self.config.vector_similarity_threshold;
        let jobs = types.iter().map(|&memory_type| {
            let subsystems = self.subsystems.clone();
            let workers = Arc::clone(&self.workers);
            let query = query.clone();
            let hints = hints.clone();
            async move {
                let job = async move {
                    let permit = workers.acquire_owned().await.map_err(|e| MemoryError::Subsystem {
                        subsystem: memory_type,
                        details: e.to_string(),
                    })?;
                    let handle = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        query_subsystem(&subsystems, memory_type, &query, k, &hints, threshold)
                    });
                    let hits = handle.await.map_err(|e| MemoryError::Subsystem {
                        subsystem: memory_type,
                        details: e.to_string(),
                    })??;
                    Ok::<SubsystemHits, MemoryError>(hits)
                };
                let outcome = match tokio::time::timeout(timeout, job).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(MemoryError::Timeout(memory_type)),
                };
                (memory_type, outcome)
            }
        });
        join_all(jobs).await
    }

    // ── update / delete / clear ──────────────────────────────────────────────

    /// Apply `update` wherever `id` is stored.  Returns the subsystems that
    /// held it.
    pub fn update(&self, id: &str, update: &MemoryUpdate) -> Vec<MemoryType> {
        let mut updated = Vec::new();
        match self.subsystems.vector.update(id, update, None) {
            Ok(true) => updated.push(MemoryType::Vector),
            Ok(false) => {}
            Err(e) => warn!(subsystem = %MemoryType::Vector, id = %id, error = %e, "update failed in subsystem"),
        }
        if self.subsystems.episodic.update(id, update) {
            updated.push(MemoryType::Episodic);
        }
        if self.subsystems.semantic.update(id, update) {
            updated.push(MemoryType::Semantic);
        }
        if self.subsystems.working.update(id, update) {
            updated.push(MemoryType::Working);
        }
        debug!(id = %id, subsystems = updated.len(), "hybrid update");
        updated
    }

    /// Delete `id` everywhere and purge its cross-connections.  `false` when
    /// no subsystem held it.
    pub fn delete(&self, id: &str) -> bool {
        let removed = [
            self.subsystems.vector.delete(id),
            self.subsystems.episodic.delete(id),
            self.subsystems.semantic.delete(id),
            self.subsystems.working.delete(id),
        ];
        let links = self.cross_links.lock().remove_id(id);
        self.coordination.lock().candidates.remove(id);
        let found = removed.iter().any(|r| *r);
        debug!(id = %id, found, links, "hybrid delete");
        found
    }

    pub fn clear(&self) {
        self.subsystems.vector.clear();
        self.subsystems.episodic.clear();
        self.subsystems.semantic.clear();
        self.subsystems.working.clear();
        self.cross_links.lock().clear();
        self.coordination.lock().candidates.clear();
        info!("cleared hybrid memory");
    }

    pub fn get_stats(&self) -> HybridStats {
        let (pending_consolidation, last_consolidation) = {
            let coordination = self.coordination.lock();
            (coordination.candidates.len(), coordination.last_consolidation)
        };
        HybridStats {
            vector: self.subsystems.vector.stats(),
            episodic: self.subsystems.episodic.stats(),
            semantic: self.subsystems.semantic.stats(),
            working: self.subsystems.working.stats(),
            cross_connections: self.cross_links.lock().stats(),
            pending_consolidation,
            last_consolidation,
            parallel_queries: self.config.parallel_queries,
            max_worker_threads: self.config.max_worker_threads,
        }
    }
}

/// Parse the RFC 3339 timestamp hint out of `metadata`, if any.
pub(crate) fn metadata_timestamp(metadata: &Metadata) -> Option<DateTime<Utc>> {
    let raw = metadata.get(TIMESTAMP_KEY)?.as_str()?;
    DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.with_timezone(&Utc))
}

fn query_subsystem(
    subsystems: &Subsystems,
    memory_type: MemoryType,
    query: &Query,
    k: usize,
    hints: &RetrieveHints,
    default_threshold: f64,
) -> Result<SubsystemHits, MemoryError> {
    match memory_type {
        MemoryType::Vector => {
            let threshold = hints.similarity_threshold.unwrap_or(default_threshold);
            let hits = match &hints.query_vector {
                Some(vector) => subsystems.vector.retrieve(vector, k, threshold)?,
                None => subsystems.vector.retrieve_text(&query.as_search_text(), k, threshold)?,
            };
            Ok(SubsystemHits::Vector(hits))
        }
        MemoryType::Episodic => Ok(SubsystemHits::Episodic(subsystems.episodic.retrieve(query, k, hints.time_window))),
        MemoryType::Semantic => Ok(SubsystemHits::Semantic(subsystems.semantic.retrieve(
            query,
            k,
            hints.include_related,
            hints.max_depth,
        ))),
        MemoryType::Working => Ok(SubsystemHits::Working(subsystems.working.retrieve(
            query,
            k,
            hints.context_tags.as_ref(),
            hints.min_activation,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RelationshipHint;
    use serde_json::json;

    fn config() -> MemoryConfiguration {
        MemoryConfiguration { vector_dimension: 256, ..Default::default() }
    }

    fn system() -> HybridMemorySystem {
        HybridMemorySystem::new(config()).unwrap()
    }

    fn sequential() -> HybridMemorySystem {
        HybridMemorySystem::new(MemoryConfiguration { parallel_queries: false, ..config() }).unwrap()
    }

    fn only(types: &[MemoryType]) -> MemoryTarget {
        MemoryTarget::Only(types.iter().copied().collect())
    }

    // ── construction ─────────────────────────────────────────────────────────

    #[test]
    fn invalid_configuration_is_rejected() {
        let cfg = MemoryConfiguration { max_worker_threads: 0, ..Default::default() };
        assert!(matches!(HybridMemorySystem::new(cfg), Err(MemoryError::InvalidConfiguration(_))));
    }

    // ── store ────────────────────────────────────────────────────────────────

    #[test]
    fn auto_store_writes_classified_subsystems_and_links_them() {
        let memory = system();
        let hints = StoreHints {
            triggers: vec!["deploy".into()],
            concept: Some("release".into()),
            ..Default::default()
        };
        let report = memory.store("release 1.2 shipped", Metadata::new(), MemoryTarget::Auto, hints).unwrap();

        let types: Vec<MemoryType> = report.written.iter().map(|r| r.memory_type).collect();
        assert_eq!(types, vec![MemoryType::Vector, MemoryType::Episodic, MemoryType::Semantic]);
        assert_eq!(report.cross_connections, 3);
        assert!(!report.is_partial());

        for node in &report.written {
            let links = memory.cross_connections(node);
            assert_eq!(links.len(), 2);
            for (other, _) in links {
                assert!(memory.cross_connections(&other).iter().any(|(back, _)| back == node));
            }
        }
    }

    #[test]
    fn partial_failure_keeps_successful_writes() {
        let memory = system();
        let hints = StoreHints { vector: Some(vec![1.0, 2.0]), ..Default::default() };
        let report = memory
            .store("bad vector", Metadata::new(), only(&[MemoryType::Vector, MemoryType::Episodic]), hints)
            .unwrap();
        assert!(report.is_partial());
        assert_eq!(report.failures[0].0, MemoryType::Vector);
        assert_eq!(report.written, vec![MemoryRef::new(MemoryType::Episodic, &report.id)]);
        assert!(memory.episodic().contains(&report.id));
    }

    #[test]
    fn store_fails_when_every_subsystem_fails() {
        let memory = system();
        let hints = StoreHints { vector: Some(vec![0.5]), ..Default::default() };
        let err = memory.store("x", Metadata::new(), MemoryType::Vector.into(), hints).unwrap_err();
        assert!(matches!(err, MemoryError::StoreFailed(_)));
    }

    #[test]
    fn rejected_relationship_hint_is_reported() {
        let memory = system();
        let hints = StoreHints {
            concept: Some("orphan".into()),
            relationships: vec![RelationshipHint {
                target: "missing".into(),
                relationship_type: "is_a".into(),
                strength: 0.5,
                bidirectional: false,
            }],
            ..Default::default()
        };
        let report = memory.store("orphan", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        assert!(report.written.iter().any(|r| r.memory_type == MemoryType::Semantic));
        assert!(matches!(report.failures[0].1, MemoryError::InvalidRelationship(_)));
    }

    #[test]
    fn timestamp_hint_dates_the_episode() {
        let memory = system();
        let when = Utc::now() - chrono::Duration::days(2);
        let hints = StoreHints { timestamp: Some(when), ..Default::default() };
        let report = memory.store("old event", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        let episode = memory.episodic().get(&report.id).unwrap();
        assert_eq!(episode.base.timestamp.timestamp(), when.timestamp());
        assert!(episode.base.metadata.contains_key(TIMESTAMP_KEY));
    }

    // ── retrieve ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn parallel_retrieve_merges_subsystems_with_cross_connections() {
        let memory = system();
        let hints = StoreHints { triggers: vec!["outage".into()], ..Default::default() };
        let report = memory.store("database outage in eu-west", Metadata::new(), MemoryTarget::Auto, hints).unwrap();

        let result = memory
            .retrieve(Query::text("database outage in eu-west"), 5, None, true, RetrieveHints::default())
            .await;
        assert!(result.failures.is_empty());
        assert_eq!(result.vector[0].0.base.id, report.id);
        assert_eq!(result.episodic[0].0.base.id, report.id);
        assert_eq!(result.types_used, vec![MemoryType::Vector, MemoryType::Episodic]);
        let key = MemoryRef::new(MemoryType::Vector, &report.id).to_string();
        assert_eq!(result.cross_connections[&key], vec![MemoryRef::new(MemoryType::Episodic, &report.id).to_string()]);
        assert!(result.confidence_score > 0.3);
    }

    #[tokio::test]
    async fn sequential_and_parallel_modes_agree() {
        let par = system();
        let seq = sequential();
        for memory in [&par, &seq] {
            let hints = StoreHints { concept: Some("billing cycle".into()), ..Default::default() };
            memory.store("billing cycle closes friday", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        }
        let a = par.retrieve(Query::text("billing"), 5, None, false, RetrieveHints::default()).await;
        let b = seq.retrieve(Query::text("billing"), 5, None, false, RetrieveHints::default()).await;
        assert_eq!(a.types_used, b.types_used);
        assert_eq!(a.semantic.len(), b.semantic.len());
    }

    #[tokio::test]
    async fn failing_subsystem_does_not_fail_the_query() {
        let memory = system();
        let hints = StoreHints { triggers: vec!["alarm".into()], ..Default::default() };
        memory.store("smoke alarm", Metadata::new(), MemoryTarget::Auto, hints).unwrap();

        let hints = RetrieveHints { query_vector: Some(vec![1.0]), ..Default::default() };
        let result = memory.retrieve(Query::text("alarm"), 5, None, false, hints).await;
        assert_eq!(result.failures.len(), 1);
        assert!(matches!(result.failures[0].1, MemoryError::DimensionMismatch { .. }));
        assert_eq!(result.episodic.len(), 1);
    }

    /// Exact index whose searches take `delay`.
    struct SlowIndex {
        inner: mnemos_memory::LinearScanIndex,
        delay: Duration,
    }

    impl VectorIndex for SlowIndex {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn is_trained(&self) -> bool {
            self.inner.is_trained()
        }

        fn min_training_size(&self) -> usize {
            self.inner.min_training_size()
        }

        fn train(&mut self, vectors: &[&[f32]]) -> Result<(), MemoryError> {
            self.inner.train(vectors)
        }

        fn add(&mut self, id: &str, vector: &[f32]) -> Result<(), MemoryError> {
            self.inner.add(id, vector)
        }

        fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, MemoryError> {
            std::thread::sleep(self.delay);
            self.inner.search(query, k)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn reset(&mut self) {
            self.inner.reset()
        }
    }

    #[tokio::test]
    async fn timed_out_subsystem_is_reported_and_others_still_answer() {
        let cfg = MemoryConfiguration { query_timeout_ms: 25, ..config() };
        let index = SlowIndex {
            inner: mnemos_memory::LinearScanIndex::new(cfg.vector_dimension, cfg.similarity_metric),
            delay: Duration::from_millis(400),
        };
        let memory = HybridMemorySystem::with_vector_index(cfg, Box::new(index)).unwrap();
        let hints = StoreHints { triggers: vec!["pager".into()], ..Default::default() };
        let report = memory.store("pager fired at night", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        assert_eq!(memory.get_stats().vector.index_backend, "slow");

        let result = memory.retrieve(Query::text("pager"), 5, None, false, RetrieveHints::default()).await;
        assert_eq!(result.failures, vec![(MemoryType::Vector, MemoryError::Timeout(MemoryType::Vector))]);
        assert!(result.vector.is_empty());
        assert_eq!(result.episodic[0].0.base.id, report.id);
        assert_eq!(result.types_used, vec![MemoryType::Episodic]);
        assert!(result.query_time < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retrieve_honours_requested_types() {
        let memory = sequential();
        let hints = StoreHints { triggers: vec!["x".into()], ..Default::default() };
        memory.store("restricted", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        let result = memory
            .retrieve(Query::text("restricted"), 5, Some(&[MemoryType::Episodic]), false, RetrieveHints::default())
            .await;
        assert!(result.vector.is_empty());
        assert_eq!(result.episodic.len(), 1);
    }

    // ── update / delete ──────────────────────────────────────────────────────

    #[test]
    fn update_reports_every_holding_subsystem() {
        let memory = system();
        let hints = StoreHints { triggers: vec!["t".into()], ..Default::default() };
        let report = memory.store("first draft", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        let updated = memory.update(&report.id, &MemoryUpdate::content("second draft"));
        assert_eq!(updated, vec![MemoryType::Vector, MemoryType::Episodic]);
        assert!(memory.update("ghost", &MemoryUpdate::importance(0.1)).is_empty());
    }

    #[test]
    fn delete_is_idempotent_and_purges_links() {
        let memory = system();
        let hints = StoreHints {
            triggers: vec!["t".into()],
            context_tags: BTreeSet::from(["ops".to_string()]),
            ..Default::default()
        };
        let report = memory.store("rotate keys", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        assert!(memory.get_stats().cross_connections.links > 0);

        assert!(memory.delete(&report.id));
        assert!(!memory.delete(&report.id));
        let stats = memory.get_stats();
        assert_eq!(stats.cross_connections.links, 0);
        assert_eq!(stats.pending_consolidation, 0);
        for node in &report.written {
            assert!(memory.cross_connections(node).is_empty());
        }
    }

    #[test]
    fn clear_empties_everything() {
        let memory = system();
        let hints = StoreHints { concept: Some("c".into()), priority: Some(9), ..Default::default() };
        memory.store("content", Metadata::from([("k".to_string(), json!(1))]), MemoryTarget::Auto, hints).unwrap();
        memory.clear();
        let stats = memory.get_stats();
        assert_eq!(stats.vector.count + stats.semantic.node_count + stats.working.count, 0);
        assert_eq!(stats.cross_connections.links, 0);
    }
}
