//! Semantic memory subsystem.
//!
//! Concept nodes connected by typed, weighted relationships in a
//! [`ConceptGraph`].  On store, a node is **auto-linked** to existing nodes of
//! the same category whose similarity exceeds 0.7:
//!
//! ```text
//! similarity = 0.3 · category_match
//!            + 0.4 · jaccard(concept tokens)
//!            + 0.3 · attribute_agreement
//! ```
//!
//! `attribute_agreement` is the fraction of shared attribute keys whose values
//! are equal; it is 1.0 when neither node carries attributes and 0.0 when only
//! one does.  Auto-links are bidirectional `similar_to` edges whose strength
//! is the similarity.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::semantic::{SemanticMemoryManager, SemanticNode};
//! use mnemos_types::MemoryItem;
//!
//! let semantic = SemanticMemoryManager::new(100, 1000);
//! let dog = semantic.store(SemanticNode::new(
//!     MemoryItem::new("dogs bark", Default::default()),
//!     "domestic dog",
//!     "animal",
//! ));
//! let cat = semantic.store(SemanticNode::new(
//!     MemoryItem::new("cats purr", Default::default()),
//!     "domestic cat",
//!     "animal",
//! ));
//! semantic.add_relationship(&dog, &cat, "chases", 0.6, false).unwrap();
//! assert_eq!(semantic.find_path(&dog, &cat, 3).unwrap().len(), 2);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use mnemos_types::{MemoryError, MemoryItem, MemoryUpdate, Metadata, Query, value_key};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::graph::ConceptGraph;

/// Relationship type of auto-created links.
pub const SIMILAR_TO: &str = "similar_to";
/// Auto-link similarity must exceed this.
pub const AUTO_LINK_THRESHOLD: f64 = 0.7;
/// Seeds expanded by related-node retrieval.
const RELATED_SEEDS: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// SemanticNode / SemanticEdge
// ─────────────────────────────────────────────────────────────────────────────

/// A concept.  The node id is `base.id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticNode {
    pub base: MemoryItem,
    pub concept: String,
    pub category: String,
    pub attributes: Metadata,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub source: String,
}

impl SemanticNode {
    pub fn new(base: MemoryItem, concept: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            base,
            concept: concept.into(),
            category: category.into(),
            attributes: Metadata::new(),
            confidence: 1.0,
            source: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn with_attributes(mut self, attributes: Metadata) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Auto-link similarity against `other` (see the module docs).
    pub fn similarity(&self, other: &SemanticNode) -> f64 {
        let category = if self.category == other.category { 1.0 } else { 0.0 };
        0.3 * category + 0.4 * concept_jaccard(&self.concept, &other.concept) + 0.3 * attribute_agreement(&self.attributes, &other.attributes)
    }
}

fn concept_jaccard(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let left: HashSet<&str> = a_lower.split_whitespace().collect();
    let right: HashSet<&str> = b_lower.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

fn attribute_agreement(a: &Metadata, b: &Metadata) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let shared: Vec<&String> = a.keys().filter(|k| b.contains_key(*k)).collect();
            if shared.is_empty() {
                return 0.0;
            }
            let equal = shared.iter().filter(|k| a.get(**k) == b.get(**k)).count();
            equal as f64 / shared.len() as f64
        }
    }
}

/// A typed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEdge {
    pub edge_id: String,
    pub from_node: String,
    pub to_node: String,
    pub relationship_type: String,
    /// In `[0, 1]`.
    pub strength: f64,
    pub bidirectional: bool,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of the semantic subsystem for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub capacity: usize,
    pub edge_capacity: usize,
    pub category_count: usize,
    pub relationship_types: BTreeMap<String, usize>,
    pub graph_density: f64,
    pub component_count: usize,
    pub average_confidence: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// SemanticMemoryManager
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SemanticState {
    nodes: HashMap<String, SemanticNode>,
    edges: HashMap<String, SemanticEdge>,
    graph: ConceptGraph,
    /// Lowercased concept → ids.
    concept_index: HashMap<String, HashSet<String>>,
    category_index: HashMap<String, HashSet<String>>,
    attribute_index: HashMap<(String, String), HashSet<String>>,
    relationship_index: HashMap<String, HashSet<String>>,
}

/// Thread-safe owner of the concept graph and its indices.
pub struct SemanticMemoryManager {
    capacity: usize,
    edge_capacity: usize,
    state: Mutex<SemanticState>,
}

impl SemanticMemoryManager {
    pub fn new(capacity: usize, edge_capacity: usize) -> Self {
        Self { capacity, edge_capacity, state: Mutex::new(SemanticState::default()) }
    }

    /// Store `node`, auto-link it within its category and evict beyond
    /// capacity.  Returns the node id.
    pub fn store(&self, node: SemanticNode) -> String {
        let id = node.base.id.clone();
        let mut state = self.state.lock();
        if state.nodes.contains_key(&id) {
            remove_node_locked(&mut state, &id);
        }
        index_node_locked(&mut state, node);
        let links = auto_link_locked(&mut state, &id);
        self.evict_nodes_locked(&mut state);
        self.evict_edges_locked(&mut state);
        debug!(id = %id, auto_links = links, nodes = state.nodes.len(), "stored semantic node");
        id
    }

    /// Create a relationship.  Both endpoints must exist.  Returns the edge id.
    pub fn add_relationship(
        &self,
        from: &str,
        to: &str,
        relationship_type: &str,
        strength: f64,
        bidirectional: bool,
    ) -> Result<String, MemoryError> {
        if from == to {
            return Err(MemoryError::InvalidRelationship(format!("self-relationship on {from}")));
        }
        let mut state = self.state.lock();
        for endpoint in [from, to] {
            if !state.nodes.contains_key(endpoint) {
                return Err(MemoryError::InvalidRelationship(format!("node {endpoint} does not exist")));
            }
        }
        let edge_id = insert_edge_locked(&mut state, from, to, relationship_type, strength, bidirectional)?;
        self.evict_edges_locked(&mut state);
        debug!(edge_id = %edge_id, from = %from, to = %to, relationship_type, "added relationship");
        Ok(edge_id)
    }

    /// Remove one relationship.  `false` if unknown.
    pub fn delete_relationship(&self, edge_id: &str) -> bool {
        let mut state = self.state.lock();
        remove_edge_locked(&mut state, edge_id)
    }

    /// Top-`k` nodes for `query`, ranked by `(current_importance, confidence)`.
    ///
    /// Text queries match concepts exactly or by case-insensitive substring;
    /// attribute queries require every pair to match.  With `include_related`
    /// the result is the top 3 matches plus every node reachable from them
    /// within `max_depth` hops.  Returned nodes are marked accessed.
    pub fn retrieve(&self, query: &Query, k: usize, include_related: bool, max_depth: usize) -> Vec<SemanticNode> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let matches: HashSet<String> = match query {
            Query::Text(text) => concept_matches(&state, text),
            Query::Attributes(attrs) => attribute_matches(&state, attrs),
        };
        let mut ranked = rank_locked(&state, matches, now);

        if include_related {
            ranked.truncate(RELATED_SEEDS);
            let mut expanded: HashSet<String> = ranked.iter().cloned().collect();
            for seed in &ranked {
                expanded.extend(state.graph.bfs(seed, max_depth).into_iter().map(|(id, _)| id));
            }
            ranked = rank_locked(&state, expanded, now);
        }
        ranked.truncate(k);

        let results: Vec<SemanticNode> = ranked
            .into_iter()
            .filter_map(|id| {
                let node = state.nodes.get_mut(&id)?;
                node.base.record_access_at(now);
                Some(node.clone())
            })
            .collect();
        debug!(k, include_related, hits = results.len(), "semantic retrieve");
        results
    }

    pub fn get(&self, id: &str) -> Option<SemanticNode> {
        self.state.lock().nodes.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().nodes.contains_key(id)
    }

    pub fn get_edge(&self, edge_id: &str) -> Option<SemanticEdge> {
        self.state.lock().edges.get(edge_id).cloned()
    }

    /// Nodes `id` points at (bidirectional edges count both ways), optionally
    /// filtered by relationship type, strongest first.
    pub fn get_related(&self, id: &str, relationship_type: Option<&str>) -> Vec<(SemanticNode, SemanticEdge)> {
        let state = self.state.lock();
        let mut related: Vec<(SemanticNode, SemanticEdge)> = state
            .graph
            .neighbors(id)
            .filter_map(|(neighbour, edge_id)| {
                let edge = state.edges.get(edge_id)?;
                if relationship_type.is_some_and(|t| t != edge.relationship_type) {
                    return None;
                }
                Some((state.nodes.get(neighbour)?.clone(), edge.clone()))
            })
            .collect();
        related.sort_by(|a, b| b.1.strength.total_cmp(&a.1.strength));
        related
    }

    /// Shortest path of node ids from `from` to `to`, or `None` if none
    /// exists within `max_length` hops.
    pub fn find_path(&self, from: &str, to: &str, max_length: usize) -> Option<Vec<String>> {
        self.state.lock().graph.shortest_path(from, to, max_length)
    }

    /// Connected components of the undirected projection with at least
    /// `min_size` nodes.
    pub fn get_concept_clusters(&self, min_size: usize) -> Vec<Vec<String>> {
        self.state.lock().graph.connected_components(min_size)
    }

    pub fn update(&self, id: &str, update: &MemoryUpdate) -> bool {
        let mut state = self.state.lock();
        match state.nodes.get_mut(id) {
            Some(node) => {
                update.apply_to(&mut node.base);
                debug!(id = %id, "updated semantic node");
                true
            }
            None => false,
        }
    }

    /// Remove a node and every edge touching it.  `false` if unknown.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = remove_node_locked(&mut state, id);
        if removed {
            debug!(id = %id, "deleted semantic node");
        }
        removed
    }

    pub fn clear(&self) {
        *self.state.lock() = SemanticState::default();
        info!("cleared semantic memory");
    }

    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.state.lock().edges.len()
    }

    pub fn stats(&self) -> SemanticStats {
        let state = self.state.lock();
        let node_count = state.nodes.len();
        let average_confidence = if node_count == 0 {
            0.0
        } else {
            state.nodes.values().map(|n| n.confidence).sum::<f64>() / node_count as f64
        };
        SemanticStats {
            node_count,
            edge_count: state.edges.len(),
            capacity: self.capacity,
            edge_capacity: self.edge_capacity,
            category_count: state.category_index.len(),
            relationship_types: state
                .relationship_index
                .iter()
                .map(|(t, ids)| (t.clone(), ids.len()))
                .collect(),
            graph_density: state.graph.density(),
            component_count: state.graph.connected_components(1).len(),
            average_confidence,
        }
    }

    fn evict_nodes_locked(&self, state: &mut SemanticState) {
        let excess = state.nodes.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let now = Utc::now();
        let mut ranked: Vec<(f64, DateTime<Utc>, String)> = state
            .nodes
            .values()
            .map(|n| (n.base.current_importance_at(now), n.base.timestamp, n.base.id.clone()))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, _, id) in ranked.into_iter().take(excess) {
            remove_node_locked(state, &id);
        }
        info!(evicted = excess, capacity = self.capacity, "semantic node eviction");
    }

    fn evict_edges_locked(&self, state: &mut SemanticState) {
        let excess = state.edges.len().saturating_sub(self.edge_capacity);
        if excess == 0 {
            return;
        }
        let mut ranked: Vec<(f64, DateTime<Utc>, String)> = state
            .edges
            .values()
            .map(|e| (e.strength, e.created_at, e.edge_id.clone()))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, _, edge_id) in ranked.into_iter().take(excess) {
            remove_edge_locked(state, &edge_id);
        }
        info!(evicted = excess, capacity = self.edge_capacity, "semantic edge eviction");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers (caller holds the lock)
// ─────────────────────────────────────────────────────────────────────────────

fn index_node_locked(state: &mut SemanticState, node: SemanticNode) {
    let id = node.base.id.clone();
    state.graph.add_node(&id);
    state.concept_index.entry(node.concept.to_lowercase()).or_default().insert(id.clone());
    state.category_index.entry(node.category.clone()).or_default().insert(id.clone());
    for (key, value) in &node.attributes {
        state
            .attribute_index
            .entry((key.clone(), value_key(value)))
            .or_default()
            .insert(id.clone());
    }
    state.nodes.insert(id, node);
}

fn remove_from<K: std::hash::Hash + Eq>(index: &mut HashMap<K, HashSet<String>>, key: &K, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn remove_node_locked(state: &mut SemanticState, id: &str) -> bool {
    let Some(node) = state.nodes.remove(id) else {
        return false;
    };
    remove_from(&mut state.concept_index, &node.concept.to_lowercase(), id);
    remove_from(&mut state.category_index, &node.category, id);
    for (key, value) in &node.attributes {
        remove_from(&mut state.attribute_index, &(key.clone(), value_key(value)), id);
    }
    for edge_id in state.graph.remove_node(id) {
        if let Some(edge) = state.edges.remove(&edge_id) {
            remove_from(&mut state.relationship_index, &edge.relationship_type, &edge_id);
        }
    }
    true
}

fn insert_edge_locked(
    state: &mut SemanticState,
    from: &str,
    to: &str,
    relationship_type: &str,
    strength: f64,
    bidirectional: bool,
) -> Result<String, MemoryError> {
    let edge_id = Uuid::new_v4().to_string();
    state.graph.add_edge(&edge_id, from, to, bidirectional)?;
    state
        .relationship_index
        .entry(relationship_type.to_string())
        .or_default()
        .insert(edge_id.clone());
    state.edges.insert(
        edge_id.clone(),
        SemanticEdge {
            edge_id: edge_id.clone(),
            from_node: from.to_string(),
            to_node: to.to_string(),
            relationship_type: relationship_type.to_string(),
            strength: strength.clamp(0.0, 1.0),
            bidirectional,
            created_at: Utc::now(),
        },
    );
    Ok(edge_id)
}

fn remove_edge_locked(state: &mut SemanticState, edge_id: &str) -> bool {
    let Some(edge) = state.edges.remove(edge_id) else {
        return false;
    };
    state.graph.remove_edge(edge_id);
    remove_from(&mut state.relationship_index, &edge.relationship_type, edge_id);
    true
}

fn has_similarity_link(state: &SemanticState, a: &str, b: &str) -> bool {
    state
        .graph
        .edges_between(a, b)
        .into_iter()
        .chain(state.graph.edges_between(b, a))
        .any(|e| state.edges.get(e).is_some_and(|edge| edge.relationship_type == SIMILAR_TO))
}

/// Link `id` to similar nodes of its category.  Returns the links created.
fn auto_link_locked(state: &mut SemanticState, id: &str) -> usize {
    let Some(node) = state.nodes.get(id) else {
        return 0;
    };
    let peers: Vec<(String, f64)> = state
        .category_index
        .get(&node.category)
        .into_iter()
        .flatten()
        .filter(|other| other.as_str() != id)
        .filter_map(|other| {
            let similarity = node.similarity(state.nodes.get(other)?);
            (similarity > AUTO_LINK_THRESHOLD).then(|| (other.clone(), similarity))
        })
        .collect();

    let mut created = 0;
    for (peer, similarity) in peers {
        if has_similarity_link(state, id, &peer) {
            continue;
        }
        if insert_edge_locked(state, id, &peer, SIMILAR_TO, similarity, true).is_ok() {
            created += 1;
        }
    }
    created
}

/// Blank text matches nothing.
fn concept_matches(state: &SemanticState, text: &str) -> HashSet<String> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return HashSet::new();
    }
    let mut matches: HashSet<String> = state.concept_index.get(&needle).cloned().unwrap_or_default();
    for (concept, ids) in &state.concept_index {
        if concept.contains(&needle) {
            matches.extend(ids.iter().cloned());
        }
    }
    matches
}

fn attribute_matches(state: &SemanticState, attrs: &Metadata) -> HashSet<String> {
    let mut sets = attrs
        .iter()
        .map(|(k, v)| state.attribute_index.get(&(k.clone(), value_key(v))).cloned().unwrap_or_default());
    let Some(first) = sets.next() else {
        return HashSet::new();
    };
    sets.fold(first, |acc, next| acc.intersection(&next).cloned().collect())
}

fn rank_locked(state: &SemanticState, ids: HashSet<String>, now: DateTime<Utc>) -> Vec<String> {
    let mut ranked: Vec<(f64, f64, String)> = ids
        .into_iter()
        .filter_map(|id| {
            let node = state.nodes.get(&id)?;
            Some((node.base.current_importance_at(now), node.confidence, id))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.total_cmp(&a.1)).then(a.2.cmp(&b.2)));
    ranked.into_iter().map(|(_, _, id)| id).collect()
}
