//! Vector index backends.
//!
//! [`VectorIndex`] is the seam between the vector subsystem and whatever
//! nearest-neighbour structure serves its queries.  Two implementations ship
//! with the crate:
//!
//! | Backend | Training | Search |
//! |---|---|---|
//! | [`IvfFlatIndex`] | k-means over at least `min_training_size` vectors | probe the `probe_count` closest inverted lists |
//! | [`LinearScanIndex`] | none (always trained) | exact scan with a [`SimilarityMetric`] |
//!
//! Indices are append-only: there is no in-place update or removal, so the
//! owner rebuilds from scratch (`reset` → `train` → `add`) when stored vectors
//! change.
//!
//! Every `search` returns `(id, similarity)` pairs with higher meaning closer.
//! Backends whose native score is a distance translate it before returning
//! (see [`IndexMetric::to_similarity`]).

use mnemos_types::{MemoryConfiguration, MemoryError, SimilarityMetric, VectorIndexKind};

/// Lloyd iterations run by [`IvfFlatIndex::train`].
const KMEANS_ITERATIONS: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// VectorIndex trait
// ─────────────────────────────────────────────────────────────────────────────

/// A nearest-neighbour index over fixed-dimension vectors.
pub trait VectorIndex: Send {
    /// Short backend name used in stats and logs.
    fn name(&self) -> &'static str;

    fn dimension(&self) -> usize;

    /// `true` once the index can accept vectors and answer queries.
    fn is_trained(&self) -> bool;

    /// Number of vectors the first training pass requires.
    fn min_training_size(&self) -> usize;

    /// Fit the index to `vectors`.  Does not add them.
    fn train(&mut self, vectors: &[&[f32]]) -> Result<(), MemoryError>;

    /// Add a vector under `id`.  Fails if the index is untrained.
    fn add(&mut self, id: &str, vector: &[f32]) -> Result<(), MemoryError>;

    /// Return up to `k` `(id, similarity)` pairs, most similar first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, MemoryError>;

    /// Number of vectors held by the index.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every vector and any training state.
    fn reset(&mut self);
}

/// Build the backend selected by `config`.
///
/// A similarity metric the IVF backend cannot order by (manhattan) is served
/// by the linear scan instead.
pub fn build_index(config: &MemoryConfiguration) -> Box<dyn VectorIndex> {
    let linear = || -> Box<dyn VectorIndex> { Box::new(LinearScanIndex::new(config.vector_dimension, config.similarity_metric)) };
    match (config.vector_index, IndexMetric::for_similarity(config.similarity_metric)) {
        (VectorIndexKind::IvfFlat, Some(metric)) => Box::new(IvfFlatIndex::new(
            config.vector_dimension,
            metric,
            config.ann_list_count,
            config.ann_probe_count,
            config.ann_min_training_vectors,
        )),
        (VectorIndexKind::IvfFlat, None) | (VectorIndexKind::Linear, _) => linear(),
    }
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), MemoryError> {
    if vector.len() != expected {
        return Err(MemoryError::DimensionMismatch { expected, actual: vector.len() });
    }
    Ok(())
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2)).sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// IndexMetric
// ─────────────────────────────────────────────────────────────────────────────

/// Native scoring family of an ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMetric {
    /// Native score is the dot product (already a similarity).
    InnerProduct,
    /// Native score is the squared euclidean distance.
    L2,
}

impl IndexMetric {
    /// Native family ranking vectors in the same order as `metric`.
    ///
    /// Cosine maps to inner product over unit vectors.  Manhattan has no
    /// counterpart.
    pub fn for_similarity(metric: SimilarityMetric) -> Option<Self> {
        match metric {
            SimilarityMetric::Cosine | SimilarityMetric::DotProduct => Some(IndexMetric::InnerProduct),
            SimilarityMetric::Euclidean => Some(IndexMetric::L2),
            SimilarityMetric::Manhattan => None,
        }
    }

    fn native(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            IndexMetric::InnerProduct => dot(a, b),
            IndexMetric::L2 => squared_l2(a, b),
        }
    }

    /// `true` when native score `a` is closer than `b`.
    fn closer(&self, a: f64, b: f64) -> bool {
        match self {
            IndexMetric::InnerProduct => a > b,
            IndexMetric::L2 => a < b,
        }
    }

    /// Translate a native score into a similarity.
    ///
    /// For unit vectors `‖a − b‖² = 2 − 2·cos(a, b)`, so `1 − d²/2` recovers
    /// the cosine similarity exactly.
    pub fn to_similarity(&self, native: f64) -> f64 {
        match self {
            IndexMetric::InnerProduct => native,
            IndexMetric::L2 => 1.0 - native / 2.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IvfFlatIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Inverted-file index with flat (uncompressed) lists.
///
/// Training runs k-means with deterministic, evenly spaced seeds; each added
/// vector is filed under its closest centroid, and a query scans only the
/// `probe_count` lists whose centroids are closest to it.
pub struct IvfFlatIndex {
    dimension: usize,
    metric: IndexMetric,
    list_count: usize,
    probe_count: usize,
    min_training: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<(String, Vec<f32>)>>,
    count: usize,
}

impl IvfFlatIndex {
    pub fn new(dimension: usize, metric: IndexMetric, list_count: usize, probe_count: usize, min_training: usize) -> Self {
        Self {
            dimension,
            metric,
            list_count: list_count.max(1),
            probe_count: probe_count.max(1),
            min_training: min_training.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
            count: 0,
        }
    }

    pub fn metric(&self) -> IndexMetric {
        self.metric
    }

    /// Number of inverted lists after training (zero before).
    pub fn list_count(&self) -> usize {
        self.centroids.len()
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        nearest(&self.centroids, vector, self.metric)
    }
}

fn nearest(centroids: &[Vec<f32>], vector: &[f32], metric: IndexMetric) -> usize {
    let mut best = 0;
    let mut best_score = metric.native(&centroids[0], vector);
    for (i, c) in centroids.iter().enumerate().skip(1) {
        let score = metric.native(c, vector);
        if metric.closer(score, best_score) {
            best = i;
            best_score = score;
        }
    }
    best
}

impl VectorIndex for IvfFlatIndex {
    fn name(&self) -> &'static str {
        "ivf_flat"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn min_training_size(&self) -> usize {
        self.min_training
    }

    fn train(&mut self, vectors: &[&[f32]]) -> Result<(), MemoryError> {
        if vectors.len() < self.min_training {
            return Err(MemoryError::Index(format!(
                "ivf_flat needs {} training vectors, got {}",
                self.min_training,
                vectors.len()
            )));
        }
        for v in vectors {
            check_dimension(self.dimension, v)?;
        }

        let k = self.list_count.min(vectors.len());
        let step = vectors.len() / k;
        let mut centroids: Vec<Vec<f32>> = (0..k).map(|i| vectors[i * step].to_vec()).collect();

        for _ in 0..KMEANS_ITERATIONS {
            let mut sums = vec![vec![0.0f64; self.dimension]; k];
            let mut counts = vec![0usize; k];
            for v in vectors {
                let c = nearest(&centroids, v, self.metric);
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(v.iter()) {
                    *s += f64::from(*x);
                }
            }
            for (c, centroid) in centroids.iter_mut().enumerate() {
                // Empty clusters keep their previous centroid.
                if counts[c] == 0 {
                    continue;
                }
                for (dst, s) in centroid.iter_mut().zip(&sums[c]) {
                    *dst = (*s / counts[c] as f64) as f32;
                }
                if self.metric == IndexMetric::InnerProduct {
                    crate::encoder::normalize(centroid);
                }
            }
        }

        self.centroids = centroids;
        self.lists = vec![Vec::new(); k];
        self.count = 0;
        Ok(())
    }

    fn add(&mut self, id: &str, vector: &[f32]) -> Result<(), MemoryError> {
        if !self.is_trained() {
            return Err(MemoryError::Index("ivf_flat index is not trained".to_string()));
        }
        check_dimension(self.dimension, vector)?;
        let list = self.nearest_centroid(vector);
        self.lists[list].push((id.to_string(), vector.to_vec()));
        self.count += 1;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, MemoryError> {
        if !self.is_trained() {
            return Err(MemoryError::Index("ivf_flat index is not trained".to_string()));
        }
        check_dimension(self.dimension, query)?;

        let mut ranked_lists: Vec<(usize, f64)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.to_similarity(self.metric.native(c, query))))
            .collect();
        ranked_lists.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut hits: Vec<(String, f64)> = ranked_lists
            .iter()
            .take(self.probe_count)
            .flat_map(|(list, _)| self.lists[*list].iter())
            .map(|(id, v)| (id.clone(), self.metric.to_similarity(self.metric.native(v, query))))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.count
    }

    fn reset(&mut self) {
        self.centroids.clear();
        self.lists.clear();
        self.count = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LinearScanIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Exact search over every added vector.  Always trained.
pub struct LinearScanIndex {
    dimension: usize,
    metric: SimilarityMetric,
    entries: Vec<(String, Vec<f32>)>,
}

impl LinearScanIndex {
    pub fn new(dimension: usize, metric: SimilarityMetric) -> Self {
        Self { dimension, metric, entries: Vec::new() }
    }
}

impl VectorIndex for LinearScanIndex {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn min_training_size(&self) -> usize {
        0
    }

    fn train(&mut self, _vectors: &[&[f32]]) -> Result<(), MemoryError> {
        Ok(())
    }

    fn add(&mut self, id: &str, vector: &[f32]) -> Result<(), MemoryError> {
        check_dimension(self.dimension, vector)?;
        self.entries.push((id.to_string(), vector.to_vec()));
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, MemoryError> {
        check_dimension(self.dimension, query)?;
        let mut hits: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, v)| (id.clone(), self.metric.score(v, query)))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PlaceholderEncoder;

    fn corpus(n: usize, dim: usize) -> Vec<(String, Vec<f32>)> {
        let enc = PlaceholderEncoder::new(dim);
        (0..n).map(|i| (format!("id-{i}"), enc.encode(&format!("document number {i} topic {}", i % 7)))).collect()
    }

    // ── IvfFlatIndex ─────────────────────────────────────────────────────────

    #[test]
    fn untrained_ivf_rejects_add_and_search() {
        let mut idx = IvfFlatIndex::new(4, IndexMetric::InnerProduct, 4, 2, 10);
        assert!(!idx.is_trained());
        assert!(matches!(idx.add("a", &[1.0, 0.0, 0.0, 0.0]), Err(MemoryError::Index(_))));
        assert!(idx.search(&[1.0, 0.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn ivf_training_requires_minimum_vectors() {
        let data = corpus(5, 16);
        let refs: Vec<&[f32]> = data.iter().map(|(_, v)| v.as_slice()).collect();
        let mut idx = IvfFlatIndex::new(16, IndexMetric::InnerProduct, 4, 2, 10);
        assert!(idx.train(&refs).is_err());
        assert!(!idx.is_trained());
    }

    #[test]
    fn ivf_finds_exact_match_first() {
        let data = corpus(120, 32);
        let refs: Vec<&[f32]> = data.iter().map(|(_, v)| v.as_slice()).collect();
        let mut idx = IvfFlatIndex::new(32, IndexMetric::InnerProduct, 8, 8, 100);
        idx.train(&refs).unwrap();
        for (id, v) in &data {
            idx.add(id, v).unwrap();
        }
        assert_eq!(idx.len(), 120);

        let hits = idx.search(&data[42].1, 3).unwrap();
        assert_eq!(hits[0].0, "id-42");
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn l2_family_reports_cosine_similarity_for_unit_vectors() {
        let data = corpus(20, 16);
        let refs: Vec<&[f32]> = data.iter().map(|(_, v)| v.as_slice()).collect();
        let mut idx = IvfFlatIndex::new(16, IndexMetric::L2, 2, 2, 10);
        idx.train(&refs).unwrap();
        for (id, v) in &data {
            idx.add(id, v).unwrap();
        }
        let hits = idx.search(&data[3].1, 20).unwrap();
        for (id, sim) in hits {
            let stored = &data.iter().find(|(i, _)| *i == id).unwrap().1;
            let cosine = SimilarityMetric::Cosine.score(stored, &data[3].1);
            assert!((sim - cosine).abs() < 1e-4);
        }
    }

    #[test]
    fn reset_returns_ivf_to_untrained() {
        let data = corpus(10, 8);
        let refs: Vec<&[f32]> = data.iter().map(|(_, v)| v.as_slice()).collect();
        let mut idx = IvfFlatIndex::new(8, IndexMetric::InnerProduct, 2, 1, 10);
        idx.train(&refs).unwrap();
        idx.add("x", &data[0].1).unwrap();
        idx.reset();
        assert!(!idx.is_trained());
        assert!(idx.is_empty());
    }

    // ── LinearScanIndex ──────────────────────────────────────────────────────

    #[test]
    fn linear_scan_is_always_trained_and_exact() {
        let mut idx = LinearScanIndex::new(2, SimilarityMetric::Cosine);
        assert!(idx.is_trained());
        idx.add("near", &[1.0, 0.0]).unwrap();
        idx.add("far", &[0.0, 1.0]).unwrap();
        let hits = idx.search(&[1.0, 0.1], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "near");
    }

    #[test]
    fn linear_scan_rejects_wrong_dimension() {
        let mut idx = LinearScanIndex::new(3, SimilarityMetric::Cosine);
        let err = idx.add("a", &[1.0]).unwrap_err();
        assert_eq!(err, MemoryError::DimensionMismatch { expected: 3, actual: 1 });
    }

    #[test]
    fn build_index_honours_configuration() {
        let cfg = MemoryConfiguration { vector_index: VectorIndexKind::Linear, ..Default::default() };
        assert_eq!(build_index(&cfg).name(), "linear");
        assert_eq!(build_index(&MemoryConfiguration::default()).name(), "ivf_flat");
        let manhattan = MemoryConfiguration { similarity_metric: SimilarityMetric::Manhattan, ..Default::default() };
        assert_eq!(build_index(&manhattan).name(), "linear");
    }
}
