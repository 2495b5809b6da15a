//! Working memory subsystem.
//!
//! Short-lived items with a priority (1–10) and an activation level in
//! `[0, 1]`.  Activation is boosted by access and decays with time; the
//! decay is applied lazily, at most once per 5 minutes, by `store` and
//! `retrieve` (there is no background timer).
//!
//! ## Working importance
//!
//! ```text
//! working_importance = clamp(current_importance
//!                            + 0.4 · activation
//!                            + 0.3 · priority / 10
//!                            + 0.3 · recency, 0, 1)
//! ```
//!
//! where `recency` falls linearly from 1 to 0 over the hour following the
//! last access.
//!
//! ## Activation propagation
//!
//! Activating an item also raises every item that lists it as a dependency
//! by 30 % of the boost (one hop, no access recorded on the dependents).
//!
//! ## Clustering
//!
//! A newly stored item joins the most similar existing cluster when
//!
//! ```text
//! 0.5 · tag_jaccard(item, cluster tags) + 0.3 · priority_closeness + 0.2 · coherence > 0.6
//! ```
//!
//! and the cluster's coherence becomes the average of its old value and that
//! similarity.  Otherwise, if at least two unclustered items score
//! `0.6 · tag_jaccard + 0.4 · priority_closeness > 0.5` against it, they form
//! a new `contextual` cluster with coherence 0.7.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use mnemos_types::{MemoryItem, MemoryUpdate, Metadata, Query, hours_between};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
/// Activation lost per hour unless configured per item.
pub const DEFAULT_ACTIVATION_DECAY_RATE: f64 = 0.1;

/// Minimum spacing between lazy decay passes.
const DECAY_INTERVAL_SECS: i64 = 300;
/// Items below this activation are eligible for eviction.
const EVICTION_ACTIVATION_FLOOR: f64 = 0.1;
/// Share of a boost passed to dependents.
const DEPENDENT_BOOST_SHARE: f64 = 0.3;
const CLUSTER_JOIN_THRESHOLD: f64 = 0.6;
const CLUSTER_SPAWN_THRESHOLD: f64 = 0.5;
const CLUSTER_SEED_COHERENCE: f64 = 0.7;
const CLUSTER_MIN_MEMBERS: usize = 2;
const CLUSTER_MIN_COHERENCE: f64 = 0.3;

// ─────────────────────────────────────────────────────────────────────────────
// WorkingMemoryItem / WorkingMemoryCluster
// ─────────────────────────────────────────────────────────────────────────────

/// A short-term item.  Dependencies are ids of other items (weak).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemoryItem {
    pub base: MemoryItem,
    /// In `[1, 10]`.
    pub priority: u8,
    /// In `[0, 1]`.
    pub activation_level: f64,
    /// Activation lost per hour.
    pub activation_decay_rate: f64,
    pub context_tags: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
}

impl WorkingMemoryItem {
    /// New item at full activation.  `priority` is clamped to `[1, 10]`.
    pub fn new(base: MemoryItem, priority: u8) -> Self {
        Self {
            base,
            priority: priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
            activation_level: 1.0,
            activation_decay_rate: DEFAULT_ACTIVATION_DECAY_RATE,
            context_tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn with_context_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_activation(mut self, activation: f64) -> Self {
        self.activation_level = activation.clamp(0.0, 1.0);
        self
    }

    pub fn with_activation_decay_rate(mut self, rate: f64) -> Self {
        self.activation_decay_rate = rate.max(0.0);
        self
    }

    /// Working importance at `now` (see the module docs).
    pub fn working_importance_at(&self, now: DateTime<Utc>) -> f64 {
        let recency = (1.0 - self.base.hours_since_last_access(now)).max(0.0);
        (self.base.current_importance_at(now)
            + 0.4 * self.activation_level
            + 0.3 * f64::from(self.priority) / 10.0
            + 0.3 * recency)
            .clamp(0.0, 1.0)
    }
}

/// A group of related working items.  Member ids are weak references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemoryCluster {
    pub cluster_id: String,
    pub item_ids: BTreeSet<String>,
    pub cluster_type: String,
    pub coherence_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of the working subsystem for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingStats {
    pub count: usize,
    pub capacity: usize,
    pub cluster_count: usize,
    pub cluster_capacity: usize,
    pub average_activation: f64,
    /// Bucketed activation counts: `low` (< 0.3), `medium`, `high` (≥ 0.7).
    pub activation_distribution: BTreeMap<String, usize>,
    pub priority_distribution: BTreeMap<u8, usize>,
    pub last_decay: DateTime<Utc>,
}

fn tag_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn priority_closeness(a: f64, b: f64) -> f64 {
    (1.0 - (a - b).abs() / f64::from(MAX_PRIORITY - MIN_PRIORITY)).clamp(0.0, 1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkingMemoryManager
// ─────────────────────────────────────────────────────────────────────────────

struct WorkingState {
    items: HashMap<String, WorkingMemoryItem>,
    priority_index: BTreeMap<u8, HashSet<String>>,
    tag_index: HashMap<String, HashSet<String>>,
    /// dependency id → ids of the items that depend on it.
    dependents: HashMap<String, HashSet<String>>,
    clusters: HashMap<String, WorkingMemoryCluster>,
    cluster_of: HashMap<String, String>,
    last_decay: DateTime<Utc>,
}

impl WorkingState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            items: HashMap::new(),
            priority_index: BTreeMap::new(),
            tag_index: HashMap::new(),
            dependents: HashMap::new(),
            clusters: HashMap::new(),
            cluster_of: HashMap::new(),
            last_decay: now,
        }
    }
}

/// Thread-safe owner of working items and their clusters.
pub struct WorkingMemoryManager {
    capacity: usize,
    cluster_capacity: usize,
    activation_boost: f64,
    state: Mutex<WorkingState>,
}

impl WorkingMemoryManager {
    pub fn new(capacity: usize, cluster_capacity: usize, activation_boost: f64) -> Self {
        Self {
            capacity,
            cluster_capacity,
            activation_boost,
            state: Mutex::new(WorkingState::new(Utc::now())),
        }
    }

    /// Store `item`, cluster it and evict beyond capacity.  Returns its id.
    pub fn store(&self, item: WorkingMemoryItem) -> String {
        let now = Utc::now();
        let id = item.base.id.clone();
        let mut state = self.state.lock();
        decay_if_due_locked(&mut state, now);
        if state.items.contains_key(&id) {
            remove_locked(&mut state, &id);
        }
        index_locked(&mut state, item);
        cluster_locked(&mut state, &id, now);
        self.evict_items_locked(&mut state);
        self.evict_clusters_locked(&mut state);
        debug!(id = %id, count = state.items.len(), "stored working item");
        id
    }

    /// Top-`k` items scored by match plus working importance.
    ///
    /// Items below `min_activation`, or sharing no tag with a non-empty
    /// `context_tags`, are skipped.  Text queries match content (whole
    /// substring 1.0, else the fraction of query tokens present); attribute
    /// queries match metadata pairs.  Non-empty queries drop items with no
    /// match.  Returned items receive the configured activation boost.
    pub fn retrieve(
        &self,
        query: &Query,
        k: usize,
        context_tags: Option<&BTreeSet<String>>,
        min_activation: f64,
    ) -> Vec<(WorkingMemoryItem, f64)> {
        let now = Utc::now();
        let mut state = self.state.lock();
        decay_if_due_locked(&mut state, now);

        let tags = context_tags.filter(|t| !t.is_empty());
        let mut scored: Vec<(String, f64)> = state
            .items
            .values()
            .filter(|item| item.activation_level >= min_activation)
            .filter(|item| tags.is_none_or(|t| !item.context_tags.is_disjoint(t)))
            .filter_map(|item| {
                let matched = match_score(item, query)?;
                Some((item.base.id.clone(), matched + item.working_importance_at(now)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        for (id, _) in &scored {
            activate_locked(&mut state, id, self.activation_boost, now);
        }
        let results: Vec<(WorkingMemoryItem, f64)> = scored
            .into_iter()
            .filter_map(|(id, score)| state.items.get(&id).map(|item| (item.clone(), score)))
            .collect();
        debug!(k, min_activation, hits = results.len(), "working retrieve");
        results
    }

    /// Boost `id` (by `boost`, or the configured amount) and its dependents.
    /// `false` if unknown.
    pub fn activate_item(&self, id: &str, boost: Option<f64>) -> bool {
        let now = Utc::now();
        let mut state = self.state.lock();
        activate_locked(&mut state, id, boost.unwrap_or(self.activation_boost), now)
    }

    pub fn get(&self, id: &str) -> Option<WorkingMemoryItem> {
        self.state.lock().items.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().items.contains_key(id)
    }

    pub fn update(&self, id: &str, update: &MemoryUpdate) -> bool {
        let mut state = self.state.lock();
        match state.items.get_mut(id) {
            Some(item) => {
                update.apply_to(&mut item.base);
                debug!(id = %id, "updated working item");
                true
            }
            None => false,
        }
    }

    /// Change the priority of `id` (clamped to `[1, 10]`).  `false` if unknown.
    pub fn update_priority(&self, id: &str, priority: u8) -> bool {
        let priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        let mut state = self.state.lock();
        let Some(item) = state.items.get_mut(id) else {
            return false;
        };
        let previous = std::mem::replace(&mut item.priority, priority);
        if let Some(ids) = state.priority_index.get_mut(&previous) {
            ids.remove(id);
            if ids.is_empty() {
                state.priority_index.remove(&previous);
            }
        }
        state.priority_index.entry(priority).or_default().insert(id.to_string());
        true
    }

    /// Remove `id` from every index and cluster.  `false` if unknown.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = remove_locked(&mut state, id);
        if removed {
            debug!(id = %id, "deleted working item");
        }
        removed
    }

    pub fn clear(&self) {
        *self.state.lock() = WorkingState::new(Utc::now());
        info!("cleared working memory");
    }

    pub fn get_clusters(&self) -> Vec<WorkingMemoryCluster> {
        let state = self.state.lock();
        let mut clusters: Vec<WorkingMemoryCluster> = state.clusters.values().cloned().collect();
        clusters.sort_by(|a, b| b.coherence_score.total_cmp(&a.coherence_score));
        clusters
    }

    /// Items at or above `min_activation`, most active first.
    pub fn get_active_items(&self, min_activation: f64) -> Vec<WorkingMemoryItem> {
        let state = self.state.lock();
        let mut items: Vec<WorkingMemoryItem> = state
            .items
            .values()
            .filter(|i| i.activation_level >= min_activation)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.activation_level.total_cmp(&a.activation_level));
        items
    }

    /// Items with working importance ≥ `threshold` or accessed more than 5
    /// times, most important first.
    pub fn consolidation_candidates(&self, threshold: f64) -> Vec<WorkingMemoryItem> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut candidates: Vec<(f64, WorkingMemoryItem)> = state
            .items
            .values()
            .filter_map(|item| {
                let importance = item.working_importance_at(now);
                (importance >= threshold || item.base.access_count > 5).then(|| (importance, item.clone()))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.into_iter().map(|(_, item)| item).collect()
    }

    pub fn calculate_working_importance(&self, id: &str) -> Option<f64> {
        let now = Utc::now();
        self.state.lock().items.get(id).map(|i| i.working_importance_at(now))
    }

    /// Apply passive decay as of `now` regardless of the lazy interval.
    pub fn apply_decay_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        decay_locked(&mut state, now);
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> WorkingStats {
        let state = self.state.lock();
        let count = state.items.len();
        let average_activation = if count == 0 {
            0.0
        } else {
            state.items.values().map(|i| i.activation_level).sum::<f64>() / count as f64
        };
        let mut activation_distribution: BTreeMap<String, usize> =
            ["low", "medium", "high"].into_iter().map(|b| (b.to_string(), 0)).collect();
        for item in state.items.values() {
            let bucket = match item.activation_level {
                a if a < 0.3 => "low",
                a if a < 0.7 => "medium",
                _ => "high",
            };
            *activation_distribution.entry(bucket.to_string()).or_default() += 1;
        }
        WorkingStats {
            count,
            capacity: self.capacity,
            cluster_count: state.clusters.len(),
            cluster_capacity: self.cluster_capacity,
            average_activation,
            activation_distribution,
            priority_distribution: state.priority_index.iter().map(|(p, ids)| (*p, ids.len())).collect(),
            last_decay: state.last_decay,
        }
    }

    /// Over capacity: drop items below the activation floor, lowest first,
    /// down to 90 % of capacity.  Capacity is soft when nothing is below the
    /// floor.
    fn evict_items_locked(&self, state: &mut WorkingState) {
        if state.items.len() <= self.capacity {
            return;
        }
        let target = self.capacity - self.capacity / 10;
        let mut low: Vec<(f64, DateTime<Utc>, String)> = state
            .items
            .values()
            .filter(|i| i.activation_level < EVICTION_ACTIVATION_FLOOR)
            .map(|i| (i.activation_level, i.base.timestamp, i.base.id.clone()))
            .collect();
        low.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut evicted = 0;
        for (_, _, id) in low {
            if state.items.len() <= target {
                break;
            }
            remove_locked(state, &id);
            evicted += 1;
        }
        info!(evicted, remaining = state.items.len(), capacity = self.capacity, "working capacity eviction");
    }

    fn evict_clusters_locked(&self, state: &mut WorkingState) {
        if state.clusters.len() <= self.cluster_capacity {
            return;
        }
        let weak: Vec<String> = state
            .clusters
            .values()
            .filter(|c| c.item_ids.len() < CLUSTER_MIN_MEMBERS || c.coherence_score < CLUSTER_MIN_COHERENCE)
            .map(|c| c.cluster_id.clone())
            .collect();
        for cluster_id in &weak {
            if let Some(cluster) = state.clusters.remove(cluster_id) {
                for member in cluster.item_ids {
                    state.cluster_of.remove(&member);
                }
            }
        }
        info!(evicted = weak.len(), capacity = self.cluster_capacity, "working cluster eviction");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers (caller holds the lock)
// ─────────────────────────────────────────────────────────────────────────────

fn index_locked(state: &mut WorkingState, item: WorkingMemoryItem) {
    let id = item.base.id.clone();
    state.priority_index.entry(item.priority).or_default().insert(id.clone());
    for tag in &item.context_tags {
        state.tag_index.entry(tag.clone()).or_default().insert(id.clone());
    }
    for dependency in &item.dependencies {
        state.dependents.entry(dependency.clone()).or_default().insert(id.clone());
    }
    state.items.insert(id, item);
}

fn remove_locked(state: &mut WorkingState, id: &str) -> bool {
    let Some(item) = state.items.remove(id) else {
        return false;
    };
    if let Some(ids) = state.priority_index.get_mut(&item.priority) {
        ids.remove(id);
        if ids.is_empty() {
            state.priority_index.remove(&item.priority);
        }
    }
    for tag in &item.context_tags {
        if let Some(ids) = state.tag_index.get_mut(tag) {
            ids.remove(id);
            if ids.is_empty() {
                state.tag_index.remove(tag);
            }
        }
    }
    for dependency in &item.dependencies {
        if let Some(ids) = state.dependents.get_mut(dependency) {
            ids.remove(id);
            if ids.is_empty() {
                state.dependents.remove(dependency);
            }
        }
    }
    state.dependents.remove(id);
    for other in state.items.values_mut() {
        other.dependencies.remove(id);
    }
    if let Some(cluster_id) = state.cluster_of.remove(id)
        && let Some(cluster) = state.clusters.get_mut(&cluster_id)
    {
        cluster.item_ids.remove(id);
        if cluster.item_ids.is_empty() {
            state.clusters.remove(&cluster_id);
        }
    }
    true
}

fn match_score(item: &WorkingMemoryItem, query: &Query) -> Option<f64> {
    match query {
        Query::Text(text) => {
            let needle = text.trim().to_lowercase();
            if needle.is_empty() {
                return Some(0.0);
            }
            let content = item.base.content.to_lowercase();
            if content.contains(&needle) {
                return Some(1.0);
            }
            let words: HashSet<&str> = content.split_whitespace().collect();
            let tokens: Vec<&str> = needle.split_whitespace().collect();
            let found = tokens.iter().filter(|t| words.contains(*t)).count();
            (found > 0).then(|| found as f64 / tokens.len() as f64)
        }
        Query::Attributes(attrs) => attribute_overlap(&item.base.metadata, attrs),
    }
}

fn attribute_overlap(metadata: &Metadata, attrs: &Metadata) -> Option<f64> {
    if attrs.is_empty() {
        return Some(0.0);
    }
    let equal = attrs.iter().filter(|(k, v)| metadata.get(*k) == Some(*v)).count();
    (equal > 0).then(|| equal as f64 / attrs.len() as f64)
}

fn activate_locked(state: &mut WorkingState, id: &str, boost: f64, now: DateTime<Utc>) -> bool {
    let Some(item) = state.items.get_mut(id) else {
        return false;
    };
    item.activation_level = (item.activation_level + boost).min(1.0);
    item.base.record_access_at(now);

    let dependents: Vec<String> = state.dependents.get(id).into_iter().flatten().cloned().collect();
    for dependent in dependents {
        if let Some(dep) = state.items.get_mut(&dependent) {
            dep.activation_level = (dep.activation_level + boost * DEPENDENT_BOOST_SHARE).min(1.0);
        }
    }
    true
}

fn decay_if_due_locked(state: &mut WorkingState, now: DateTime<Utc>) {
    if now - state.last_decay >= Duration::seconds(DECAY_INTERVAL_SECS) {
        decay_locked(state, now);
    }
}

fn decay_locked(state: &mut WorkingState, now: DateTime<Utc>) {
    let since = state.last_decay;
    for item in state.items.values_mut() {
        let hours = hours_between(since.max(item.base.timestamp), now);
        item.activation_level = (item.activation_level - item.activation_decay_rate * hours).max(0.0);
    }
    state.last_decay = now;
    debug!(items = state.items.len(), "applied working memory decay");
}

fn cluster_locked(state: &mut WorkingState, id: &str, now: DateTime<Utc>) {
    let Some(item) = state.items.get(id) else {
        return;
    };
    let priority = f64::from(item.priority);

    let best = state
        .clusters
        .values()
        .filter(|c| !c.item_ids.contains(id))
        .map(|c| {
            let tags: BTreeSet<String> = c
                .item_ids
                .iter()
                .filter_map(|m| state.items.get(m))
                .flat_map(|m| m.context_tags.iter().cloned())
                .collect();
            let members: Vec<f64> = c
                .item_ids
                .iter()
                .filter_map(|m| state.items.get(m).map(|i| f64::from(i.priority)))
                .collect();
            let average_priority = if members.is_empty() {
                priority
            } else {
                members.iter().sum::<f64>() / members.len() as f64
            };
            let similarity = 0.5 * tag_jaccard(&item.context_tags, &tags)
                + 0.3 * priority_closeness(priority, average_priority)
                + 0.2 * c.coherence_score;
            (c.cluster_id.clone(), similarity)
        })
        .filter(|(_, similarity)| *similarity > CLUSTER_JOIN_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1));

    if let Some((cluster_id, similarity)) = best {
        if let Some(cluster) = state.clusters.get_mut(&cluster_id) {
            cluster.item_ids.insert(id.to_string());
            cluster.coherence_score = (cluster.coherence_score + similarity) / 2.0;
            cluster.updated_at = now;
        }
        state.cluster_of.insert(id.to_string(), cluster_id.clone());
        debug!(id = %id, cluster_id = %cluster_id, similarity, "joined working cluster");
        return;
    }

    let peers: Vec<String> = state
        .items
        .values()
        .filter(|other| other.base.id != id && !state.cluster_of.contains_key(&other.base.id))
        .filter(|other| {
            0.6 * tag_jaccard(&item.context_tags, &other.context_tags)
                + 0.4 * priority_closeness(priority, f64::from(other.priority))
                > CLUSTER_SPAWN_THRESHOLD
        })
        .map(|other| other.base.id.clone())
        .collect();
    if peers.len() < CLUSTER_MIN_MEMBERS {
        return;
    }

    let cluster_id = Uuid::new_v4().to_string();
    let mut item_ids: BTreeSet<String> = peers.into_iter().collect();
    item_ids.insert(id.to_string());
    for member in &item_ids {
        state.cluster_of.insert(member.clone(), cluster_id.clone());
    }
    debug!(cluster_id = %cluster_id, members = item_ids.len(), "formed working cluster");
    state.clusters.insert(
        cluster_id.clone(),
        WorkingMemoryCluster {
            cluster_id,
            item_ids,
            cluster_type: "contextual".to_string(),
            coherence_score: CLUSTER_SEED_COHERENCE,
            created_at: now,
            updated_at: now,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> WorkingMemoryManager {
        WorkingMemoryManager::new(100, 20, 0.2)
    }

    fn item(content: &str, priority: u8) -> WorkingMemoryItem {
        WorkingMemoryItem::new(MemoryItem::new(content, Metadata::new()), priority)
    }

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    // ── WorkingMemoryItem ────────────────────────────────────────────────────

    #[test]
    fn priority_is_clamped() {
        assert_eq!(item("x", 0).priority, 1);
        assert_eq!(item("x", 42).priority, 10);
    }

    #[test]
    fn working_importance_is_bounded() {
        let now = Utc::now();
        let high = item("x", 10);
        let low = item("y", 1).with_activation(0.0);
        assert_eq!(high.working_importance_at(now), 1.0);
        let value = low.working_importance_at(now + Duration::days(30));
        assert!((0.0..=1.0).contains(&value));
    }

    // ── retrieve / activation ────────────────────────────────────────────────

    #[test]
    fn retrieve_filters_by_activation_and_tags() {
        let mgr = manager();
        let hot = mgr.store(item("build pipeline broken", 5).with_context_tags(["ci"]));
        mgr.store(item("build cache cold", 5).with_context_tags(["ci"]).with_activation(0.05));
        mgr.store(item("build docs", 5).with_context_tags(["docs"]));

        let hits = mgr.retrieve(&Query::text("build"), 10, Some(&tags(&["ci"])), 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.base.id, hot);
    }

    #[test]
    fn retrieve_boosts_activation_of_results() {
        let mgr = manager();
        let id = mgr.store(item("draft reply", 5).with_activation(0.5));
        let hits = mgr.retrieve(&Query::text("draft"), 1, None, 0.0);
        assert!((hits[0].0.activation_level - 0.7).abs() < 1e-9);
        assert_eq!(mgr.get(&id).unwrap().base.access_count, 1);
    }

    #[test]
    fn retrieve_by_metadata_attributes() {
        let mgr = manager();
        let mut base = MemoryItem::new("ticket", Metadata::new());
        base.metadata.insert("customer".to_string(), json!("acme"));
        let id = mgr.store(WorkingMemoryItem::new(base, 5));
        mgr.store(item("other", 5));
        let hits = mgr.retrieve(&Query::attributes([("customer", json!("acme"))]), 10, None, 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.base.id, id);
    }

    #[test]
    fn activation_propagates_to_dependents() {
        let mgr = manager();
        let root = mgr.store(item("root task", 5).with_activation(0.2));
        let child = mgr.store(item("child task", 5).with_activation(0.2).with_dependencies([root.clone()]));

        assert!(mgr.activate_item(&root, Some(0.5)));
        assert!((mgr.get(&root).unwrap().activation_level - 0.7).abs() < 1e-9);
        assert!((mgr.get(&child).unwrap().activation_level - 0.35).abs() < 1e-9);
        assert!(!mgr.activate_item("ghost", None));
    }

    #[test]
    fn activation_is_capped_at_one() {
        let mgr = manager();
        let id = mgr.store(item("x", 5));
        mgr.activate_item(&id, Some(0.9));
        assert_eq!(mgr.get(&id).unwrap().activation_level, 1.0);
    }

    // ── decay ────────────────────────────────────────────────────────────────

    #[test]
    fn decay_reduces_activation_by_rate_times_hours() {
        let mgr = manager();
        let id = mgr.store(item("x", 5));
        mgr.apply_decay_at(Utc::now() + Duration::hours(2));
        let activation = mgr.get(&id).unwrap().activation_level;
        assert!((activation - 0.8).abs() < 1e-3);

        mgr.apply_decay_at(Utc::now() + Duration::hours(100));
        assert_eq!(mgr.get(&id).unwrap().activation_level, 0.0);
    }

    // ── clustering ───────────────────────────────────────────────────────────

    #[test]
    fn related_items_form_then_join_a_cluster() {
        let mgr = manager();
        let a = mgr.store(item("a", 5).with_context_tags(["billing"]));
        let b = mgr.store(item("b", 5).with_context_tags(["billing"]));
        assert!(mgr.get_clusters().is_empty());

        let c = mgr.store(item("c", 6).with_context_tags(["billing"]));
        let clusters = mgr.get_clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].item_ids, BTreeSet::from([a, b, c]));
        assert_eq!(clusters[0].coherence_score, 0.7);

        let d = mgr.store(item("d", 5).with_context_tags(["billing"]));
        let clusters = mgr.get_clusters();
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].item_ids.contains(&d));
        assert!(clusters[0].coherence_score > 0.7);
    }

    #[test]
    fn untagged_items_do_not_cluster() {
        let mgr = manager();
        for i in 0..4 {
            mgr.store(item(&format!("n{i}"), 5));
        }
        assert!(mgr.get_clusters().is_empty());
    }

    #[test]
    fn delete_prunes_cluster_membership_and_dependencies() {
        let mgr = manager();
        let a = mgr.store(item("a", 5).with_context_tags(["t"]));
        let b = mgr.store(item("b", 5).with_context_tags(["t"]).with_dependencies([a.clone()]));
        mgr.store(item("c", 5).with_context_tags(["t"]));

        assert!(mgr.delete(&a));
        assert!(!mgr.delete(&a));
        assert!(mgr.get(&b).unwrap().dependencies.is_empty());
        assert!(mgr.get_clusters().iter().all(|c| !c.item_ids.contains(&a)));
    }

    // ── consolidation candidates ─────────────────────────────────────────────

    #[test]
    fn high_priority_fresh_item_is_a_candidate() {
        let mgr = manager();
        let id = mgr.store(item("credit limit increased to $5000", 9));
        let candidates = mgr.consolidation_candidates(0.7);
        assert!(candidates.iter().any(|c| c.base.id == id));
    }

    #[test]
    fn frequently_accessed_item_is_a_candidate_below_threshold() {
        let mgr = manager();
        let id = mgr.store(item("note", 1).with_activation(0.0));
        for _ in 0..6 {
            mgr.activate_item(&id, Some(0.0));
        }
        assert!(mgr.consolidation_candidates(2.0).iter().any(|c| c.base.id == id));
    }

    // ── eviction / priority ──────────────────────────────────────────────────

    #[test]
    fn eviction_drops_inactive_items_with_slack() {
        let mgr = WorkingMemoryManager::new(10, 20, 0.2);
        let cold: Vec<String> = (0..5).map(|i| mgr.store(item(&format!("cold {i}"), 5).with_activation(0.01 * i as f64))).collect();
        for i in 0..6 {
            mgr.store(item(&format!("hot {i}"), 5));
        }
        // 11 items > 10: evict cold items down to 9.
        assert_eq!(mgr.len(), 9);
        assert!(!mgr.contains(&cold[0]));
        assert!(!mgr.contains(&cold[1]));
        assert!(mgr.contains(&cold[2]));
    }

    #[test]
    fn capacity_is_soft_when_everything_is_active() {
        let mgr = WorkingMemoryManager::new(2, 20, 0.2);
        for i in 0..3 {
            mgr.store(item(&format!("busy {i}"), 5));
        }
        assert_eq!(mgr.len(), 3);
    }

    #[test]
    fn update_priority_reindexes() {
        let mgr = manager();
        let id = mgr.store(item("x", 3));
        assert!(mgr.update_priority(&id, 8));
        let stats = mgr.stats();
        assert_eq!(stats.priority_distribution.get(&8), Some(&1));
        assert_eq!(stats.priority_distribution.get(&3), None);
        assert!(!mgr.update_priority("ghost", 5));
    }
}
