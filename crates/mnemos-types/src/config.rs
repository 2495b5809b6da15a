//! [`MemoryConfiguration`] – capacity limits and tuning knobs for the engine.
//!
//! Every field carries a serde default, so a partial TOML document (or an
//! empty one) deserialises into a complete configuration.  Reading the
//! document from disk is the host application's job; this module only parses
//! strings and applies `MNEMOS_*` environment overrides.
//!
//! | Variable | Field |
//! |---|---|
//! | `MNEMOS_VECTOR_DIMENSION` | `vector_dimension` |
//! | `MNEMOS_PARALLEL_QUERIES` | `parallel_queries` |
//! | `MNEMOS_MAX_WORKER_THREADS` | `max_worker_threads` |
//! | `MNEMOS_QUERY_TIMEOUT_MS` | `query_timeout_ms` |
//! | `MNEMOS_CONSOLIDATION_THRESHOLD` | `consolidation_threshold` |
//!
//! # Example
//!
//! ```rust
//! use mnemos_types::MemoryConfiguration;
//!
//! let cfg = MemoryConfiguration::from_toml_str("vector_capacity = 3\nparallel_queries = false").unwrap();
//! assert_eq!(cfg.vector_capacity, 3);
//! assert!(!cfg.parallel_queries);
//! assert_eq!(cfg.vector_dimension, 384);
//! ```

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::MemoryError;

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Similarity function defining every vector retrieval score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    /// `1 / (1 + euclidean_distance)`.
    Euclidean,
    /// `1 / (1 + manhattan_distance)`.
    Manhattan,
    DotProduct,
}

impl SimilarityMetric {
    /// Score `a` against `b`; higher is more similar.
    ///
    /// Vectors of unequal length score `0.0`.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() {
            return 0.0;
        }
        match self {
            SimilarityMetric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
                let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
                let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
            SimilarityMetric::Euclidean => {
                let dist: f64 = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
                    .sum::<f64>()
                    .sqrt();
                1.0 / (1.0 + dist)
            }
            SimilarityMetric::Manhattan => {
                let dist: f64 = a.iter().zip(b).map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs()).sum();
                1.0 / (1.0 + dist)
            }
            SimilarityMetric::DotProduct => a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum(),
        }
    }
}

/// Which vector index family the vector subsystem is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexKind {
    /// Inverted-file ANN index with a k-means coarse quantiser.
    #[default]
    IvfFlat,
    /// Exact linear scan.
    Linear,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryConfiguration
// ─────────────────────────────────────────────────────────────────────────────

/// Engine-wide configuration consumed by every subsystem and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryConfiguration {
    /// Maximum number of vector memories.
    #[serde(default = "default_vector_capacity")]
    pub vector_capacity: usize,
    /// Maximum number of episodes.
    #[serde(default = "default_episodic_capacity")]
    pub episodic_capacity: usize,
    /// Maximum number of semantic nodes.
    #[serde(default = "default_semantic_capacity")]
    pub semantic_capacity: usize,
    /// Maximum number of semantic edges.
    #[serde(default = "default_semantic_edge_capacity")]
    pub semantic_edge_capacity: usize,
    /// Soft cap on working-memory items.
    #[serde(default = "default_working_capacity")]
    pub working_capacity: usize,
    /// Cap on working-memory clusters.
    #[serde(default = "default_working_cluster_capacity")]
    pub working_cluster_capacity: usize,

    /// Dimension of every stored vector.
    #[serde(default = "default_vector_dimension")]
    pub vector_dimension: usize,
    /// Minimum similarity for vector results.
    #[serde(default = "default_vector_similarity_threshold")]
    pub vector_similarity_threshold: f64,
    /// Metric for the linear-scan path.
    #[serde(default)]
    pub similarity_metric: SimilarityMetric,
    /// Index family used for vector search.
    #[serde(default)]
    pub vector_index: VectorIndexKind,
    /// Vectors required before the ANN index is first trained.
    #[serde(default = "default_ann_min_training_vectors")]
    pub ann_min_training_vectors: usize,
    /// Number of inverted lists (k-means centroids).
    #[serde(default = "default_ann_list_count")]
    pub ann_list_count: usize,
    /// Number of inverted lists probed per query.
    #[serde(default = "default_ann_probe_count")]
    pub ann_probe_count: usize,

    /// Create cross-connections between co-stored items.
    #[serde(default = "default_true")]
    pub enable_cross_connections: bool,
    /// Links weaker than this are not recorded.
    #[serde(default = "default_cross_connection_threshold")]
    pub cross_connection_threshold: f64,
    /// Per-item cap on cross-connections.
    #[serde(default = "default_max_cross_connections")]
    pub max_cross_connections: usize,

    /// Fan retrieval out to subsystems concurrently.
    #[serde(default = "default_true")]
    pub parallel_queries: bool,
    /// Size of the retrieval worker pool.
    #[serde(default = "default_max_worker_threads")]
    pub max_worker_threads: usize,
    /// Per-subsystem retrieval timeout in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Seconds between automatic consolidation passes.
    #[serde(default = "default_consolidation_interval_secs")]
    pub consolidation_interval_secs: u64,
    /// Working importance at or above which an item is consolidated.
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: f64,
    /// Candidate-set size that triggers an automatic consolidation pass.
    #[serde(default = "default_consolidation_batch_size")]
    pub consolidation_batch_size: usize,
    /// Activation added to a working item when it is retrieved or activated.
    #[serde(default = "default_working_activation_boost")]
    pub working_activation_boost: f64,
}

fn default_vector_capacity() -> usize {
    10_000
}
fn default_episodic_capacity() -> usize {
    5_000
}
fn default_semantic_capacity() -> usize {
    10_000
}
fn default_semantic_edge_capacity() -> usize {
    50_000
}
fn default_working_capacity() -> usize {
    100
}
fn default_working_cluster_capacity() -> usize {
    20
}
fn default_vector_dimension() -> usize {
    384
}
fn default_vector_similarity_threshold() -> f64 {
    0.3
}
fn default_ann_min_training_vectors() -> usize {
    100
}
fn default_ann_list_count() -> usize {
    16
}
fn default_ann_probe_count() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_cross_connection_threshold() -> f64 {
    0.5
}
fn default_max_cross_connections() -> usize {
    50
}
fn default_max_worker_threads() -> usize {
    4
}
fn default_query_timeout_ms() -> u64 {
    5_000
}
fn default_consolidation_interval_secs() -> u64 {
    3_600
}
fn default_consolidation_threshold() -> f64 {
    0.7
}
fn default_consolidation_batch_size() -> usize {
    10
}
fn default_working_activation_boost() -> f64 {
    0.2
}

impl Default for MemoryConfiguration {
    fn default() -> Self {
        Self {
            vector_capacity: default_vector_capacity(),
            episodic_capacity: default_episodic_capacity(),
            semantic_capacity: default_semantic_capacity(),
            semantic_edge_capacity: default_semantic_edge_capacity(),
            working_capacity: default_working_capacity(),
            working_cluster_capacity: default_working_cluster_capacity(),
            vector_dimension: default_vector_dimension(),
            vector_similarity_threshold: default_vector_similarity_threshold(),
            similarity_metric: SimilarityMetric::default(),
            vector_index: VectorIndexKind::default(),
            ann_min_training_vectors: default_ann_min_training_vectors(),
            ann_list_count: default_ann_list_count(),
            ann_probe_count: default_ann_probe_count(),
            enable_cross_connections: true,
            cross_connection_threshold: default_cross_connection_threshold(),
            max_cross_connections: default_max_cross_connections(),
            parallel_queries: true,
            max_worker_threads: default_max_worker_threads(),
            query_timeout_ms: default_query_timeout_ms(),
            consolidation_interval_secs: default_consolidation_interval_secs(),
            consolidation_threshold: default_consolidation_threshold(),
            consolidation_batch_size: default_consolidation_batch_size(),
            working_activation_boost: default_working_activation_boost(),
        }
    }
}

impl MemoryConfiguration {
    /// Parse a TOML document, apply `MNEMOS_*` overrides, and validate.
    pub fn from_toml_str(raw: &str) -> Result<Self, MemoryError> {
        let mut cfg: MemoryConfiguration =
            toml::from_str(raw).map_err(|e| MemoryError::InvalidConfiguration(format!("failed to parse configuration: {e}")))?;
        apply_env_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations no subsystem can operate with.
    pub fn validate(&self) -> Result<(), MemoryError> {
        let invalid = |msg: &str| Err(MemoryError::InvalidConfiguration(msg.to_string()));
        if self.vector_dimension == 0 {
            return invalid("vector_dimension must be greater than zero");
        }
        if self.max_worker_threads == 0 {
            return invalid("max_worker_threads must be at least 1");
        }
        if self.query_timeout_ms == 0 {
            return invalid("query_timeout_ms must be greater than zero");
        }
        if self.ann_list_count == 0 || self.ann_probe_count == 0 {
            return invalid("ann_list_count and ann_probe_count must be at least 1");
        }
        for (name, value) in [
            ("vector_similarity_threshold", self.vector_similarity_threshold),
            ("cross_connection_threshold", self.cross_connection_threshold),
            ("consolidation_threshold", self.consolidation_threshold),
            ("working_activation_boost", self.working_activation_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::InvalidConfiguration(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        Ok(())
    }

    /// Per-subsystem retrieval timeout.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Interval between automatic consolidation passes.
    pub fn consolidation_interval(&self) -> Duration {
        Duration::from_secs(self.consolidation_interval_secs)
    }

    /// JSON Schema describing this configuration, for hosts that validate
    /// their own configuration documents.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(MemoryConfiguration);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}

/// Apply `MNEMOS_*` environment variable overrides to `cfg`.
///
/// Unparseable values are ignored and the existing value is kept.
pub fn apply_env_overrides(cfg: &mut MemoryConfiguration) {
    if let Ok(v) = std::env::var("MNEMOS_VECTOR_DIMENSION")
        && let Ok(dim) = v.parse::<usize>()
    {
        cfg.vector_dimension = dim;
    }
    if let Ok(v) = std::env::var("MNEMOS_PARALLEL_QUERIES")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.parallel_queries = flag;
    }
    if let Ok(v) = std::env::var("MNEMOS_MAX_WORKER_THREADS")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.max_worker_threads = n;
    }
    if let Ok(v) = std::env::var("MNEMOS_QUERY_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.query_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("MNEMOS_CONSOLIDATION_THRESHOLD")
        && let Ok(t) = v.parse::<f64>()
    {
        cfg.consolidation_threshold = t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults / parsing ───────────────────────────────────────────────────

    #[test]
    fn default_configuration_is_valid() {
        assert!(MemoryConfiguration::default().validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: MemoryConfiguration = toml::from_str("").unwrap();
        assert_eq!(cfg, MemoryConfiguration::default());
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let cfg: MemoryConfiguration =
            toml::from_str("working_capacity = 7\nsimilarity_metric = \"manhattan\"\nvector_index = \"linear\"").unwrap();
        assert_eq!(cfg.working_capacity, 7);
        assert_eq!(cfg.similarity_metric, SimilarityMetric::Manhattan);
        assert_eq!(cfg.vector_index, VectorIndexKind::Linear);
        assert_eq!(cfg.episodic_capacity, 5_000);
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = MemoryConfiguration::from_toml_str("vector_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfiguration(_)));
    }

    // ── validate ─────────────────────────────────────────────────────────────

    #[test]
    fn zero_dimension_is_rejected() {
        let cfg = MemoryConfiguration { vector_dimension: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let cfg = MemoryConfiguration { consolidation_threshold: 1.5, ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("consolidation_threshold"));
    }

    #[test]
    fn zero_worker_threads_is_rejected() {
        let cfg = MemoryConfiguration { max_worker_threads: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    // ── env overrides ────────────────────────────────────────────────────────

    #[test]
    fn apply_env_overrides_changes_worker_threads() {
        // SAFETY: only this test touches this variable.
        unsafe { std::env::set_var("MNEMOS_MAX_WORKER_THREADS", "9") };
        let mut cfg = MemoryConfiguration::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_worker_threads, 9);
        unsafe { std::env::remove_var("MNEMOS_MAX_WORKER_THREADS") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_timeout() {
        // SAFETY: only this test touches this variable.
        unsafe { std::env::set_var("MNEMOS_QUERY_TIMEOUT_MS", "soon") };
        let mut cfg = MemoryConfiguration::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.query_timeout_ms, 5_000);
        unsafe { std::env::remove_var("MNEMOS_QUERY_TIMEOUT_MS") };
    }

    // ── metrics ──────────────────────────────────────────────────────────────

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = [1.0f32, 2.0, 3.0];
        assert!((SimilarityMetric::Cosine.score(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!(SimilarityMetric::Cosine.score(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_zero_vector_returns_zero() {
        assert_eq!(SimilarityMetric::Cosine.score(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn distance_metrics_map_identity_to_one() {
        let v = [0.5f32, -0.5, 2.0];
        assert!((SimilarityMetric::Euclidean.score(&v, &v) - 1.0).abs() < 1e-9);
        assert!((SimilarityMetric::Manhattan.score(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn manhattan_similarity_shrinks_with_distance() {
        let a = [0.0f32, 0.0];
        let near = SimilarityMetric::Manhattan.score(&a, &[1.0, 0.0]);
        let far = SimilarityMetric::Manhattan.score(&a, &[3.0, 4.0]);
        assert!((near - 0.5).abs() < 1e-9);
        assert!(far < near);
    }

    #[test]
    fn dot_product_is_raw_sum() {
        assert!((SimilarityMetric::DotProduct.score(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(SimilarityMetric::Cosine.score(&[1.0], &[1.0, 0.0]), 0.0);
    }

    // ── schema ───────────────────────────────────────────────────────────────

    #[test]
    fn json_schema_lists_configuration_fields() {
        let schema = MemoryConfiguration::json_schema();
        let props = schema["properties"].as_object().expect("properties object");
        assert!(props.contains_key("vector_capacity"));
        assert!(props.contains_key("consolidation_threshold"));
    }
}
