//! Episodic memory subsystem.
//!
//! Stores timestamped episodes (content plus context, triggers and
//! outcomes), answers temporal and contextual queries, and mines the most
//! recent episodes for recurring trigger patterns.
//!
//! # Indices
//!
//! | index | key | used by |
//! |---|---|---|
//! | timeline | `(timestamp, id)`, ordered | range scans, temporal neighbours |
//! | context | `(key, value)` → ids | attribute queries |
//! | trigger | trigger → ids | text queries, [`retrieve_by_trigger`][EpisodicMemoryManager::retrieve_by_trigger] |
//! | recent | ring buffer of the last 100 stored ids | pattern detection |
//!
//! # Pattern detection
//!
//! After every store the signature histogram is recomputed over the last 10
//! buffered ids.  Each position contributes the trailing window of up to 3
//! episodes ending at it; the window's signature is the sorted union of its
//! episodes' triggers.  A signature seen at least 3 times becomes (or
//! refreshes) a [`Sequence`] holding every episode of the matching windows,
//! with `pattern_strength = min(1, count / 10)`.
//!
//! ```rust
//! use mnemos_memory::episodic::{EpisodeMemory, EpisodicMemoryManager};
//! use mnemos_types::MemoryItem;
//!
//! let episodes = EpisodicMemoryManager::new(100);
//! for attempt in 0..3 {
//!     let item = MemoryItem::new(format!("login attempt {attempt} rejected"), Default::default());
//!     episodes.store(EpisodeMemory::new(item).with_triggers(["login_failure"]));
//! }
//! let sequences = episodes.get_sequences();
//! assert_eq!(sequences.len(), 1);
//! assert!(sequences[0].pattern_strength >= 0.3);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use mnemos_types::{Metadata, MemoryItem, MemoryUpdate, Query, hours_between, value_key};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Ring buffer length for recently stored ids.
pub const RECENT_BUFFER_LEN: usize = 100;
/// Number of buffered ids scanned by pattern detection.
pub const PATTERN_SCAN_LEN: usize = 10;
/// Maximum episodes per pattern window.
pub const PATTERN_WINDOW: usize = 3;
/// Occurrences required before a signature becomes a [`Sequence`].
pub const PATTERN_MIN_COUNT: usize = 3;

/// Recency for context queries decays linearly to zero over this many hours.
const RECENCY_HORIZON_HOURS: f64 = 24.0;

// ─────────────────────────────────────────────────────────────────────────────
// EpisodeMemory
// ─────────────────────────────────────────────────────────────────────────────

/// A timestamped episode.  The episode id is `base.id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMemory {
    pub base: MemoryItem,
    pub context: Metadata,
    /// Ordered, without duplicates.
    pub triggers: Vec<String>,
    /// Ordered, without duplicates.
    pub outcomes: Vec<String>,
    /// Duration in seconds, when known.
    pub duration: Option<f64>,
    /// In `[-1, 1]`.
    pub emotional_valence: f64,
}

impl EpisodeMemory {
    pub fn new(base: MemoryItem) -> Self {
        Self {
            base,
            context: Metadata::new(),
            triggers: Vec::new(),
            outcomes: Vec::new(),
            duration: None,
            emotional_valence: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn with_context(mut self, context: Metadata) -> Self {
        self.context = context;
        self
    }

    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = ordered_unique(triggers);
        self
    }

    pub fn with_outcomes<I, S>(mut self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outcomes = ordered_unique(outcomes);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds.max(0.0));
        self
    }

    pub fn with_emotional_valence(mut self, valence: f64) -> Self {
        self.emotional_valence = valence.clamp(-1.0, 1.0);
        self
    }

    /// Linear recency in `[0, 1]`, zero once the episode is a day old.
    fn recency_at(&self, now: DateTime<Utc>) -> f64 {
        (1.0 - hours_between(self.base.timestamp, now) / RECENCY_HORIZON_HOURS).max(0.0)
    }
}

fn ordered_unique<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(Into::into)
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Sequence
// ─────────────────────────────────────────────────────────────────────────────

/// A recurring pattern of episodes.
///
/// `episode_ids` are weak references: deleting an episode removes its id
/// here but never deletes the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub sequence_id: String,
    /// Chronological order.
    pub episode_ids: Vec<String>,
    pub sequence_type: String,
    pub pattern_strength: f64,
    /// Sorted trigger set that identifies the pattern.
    pub signature: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of the episodic subsystem for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicStats {
    pub count: usize,
    pub capacity: usize,
    pub sequence_count: usize,
    pub distinct_triggers: usize,
    pub distinct_context_pairs: usize,
    pub buffered_recent: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub average_importance: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// EpisodicMemoryManager
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct EpisodicState {
    episodes: HashMap<String, EpisodeMemory>,
    timeline: BTreeSet<(DateTime<Utc>, String)>,
    context_index: HashMap<(String, String), HashSet<String>>,
    trigger_index: HashMap<String, HashSet<String>>,
    recent: VecDeque<String>,
    sequences: HashMap<String, Sequence>,
    sequence_by_signature: HashMap<Vec<String>, String>,
}

/// Thread-safe owner of all episodes and sequences.
pub struct EpisodicMemoryManager {
    capacity: usize,
    state: Mutex<EpisodicState>,
}

impl EpisodicMemoryManager {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: Mutex::new(EpisodicState::default()) }
    }

    /// Store `episode`, run pattern detection and evict beyond capacity.
    /// Returns the episode id.
    pub fn store(&self, episode: EpisodeMemory) -> String {
        let id = episode.base.id.clone();
        let mut state = self.state.lock();
        if state.episodes.contains_key(&id) {
            remove_locked(&mut state, &id);
        }
        index_locked(&mut state, episode);

        state.recent.push_back(id.clone());
        if state.recent.len() > RECENT_BUFFER_LEN {
            state.recent.pop_front();
        }
        detect_patterns_locked(&mut state);
        self.evict_locked(&mut state);
        debug!(id = %id, count = state.episodes.len(), "stored episode");
        id
    }

    /// Top-`k` episodes for `query`, optionally restricted to the inclusive
    /// `time_window`.  Returned episodes are marked accessed.
    ///
    /// - Text: exact trigger hits (match 1.0) plus case-insensitive content
    ///   substring hits (match 0.5), scored `0.5·match + 0.3·recency +
    ///   0.2·importance`.
    /// - Attributes: `0.5·overlap + 0.3·recency + 0.2·importance`, where
    ///   overlap is the fraction of query pairs present in the context.
    ///   Episodes with no overlap are not returned.
    pub fn retrieve(
        &self,
        query: &Query,
        k: usize,
        time_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<(EpisodeMemory, f64)> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let matches: HashMap<String, f64> = match query {
            Query::Text(text) => text_matches(&state, text),
            Query::Attributes(attrs) => context_matches(&state, attrs),
        };

        let mut scored: Vec<(String, f64, DateTime<Utc>)> = matches
            .into_iter()
            .filter_map(|(id, matched)| {
                let ep = state.episodes.get(&id)?;
                if let Some((start, end)) = time_window
                    && (ep.base.timestamp < start || ep.base.timestamp > end)
                {
                    return None;
                }
                let score = 0.5 * matched + 0.3 * ep.recency_at(now) + 0.2 * ep.base.current_importance_at(now);
                Some((id, score, ep.base.timestamp))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.2.cmp(&a.2)));
        scored.truncate(k);

        let results = touch_locked(&mut state, scored.into_iter().map(|(id, score, _)| (id, score)), now);
        debug!(k, hits = results.len(), "episodic retrieve");
        results
    }

    /// Most recent `k` episodes carrying `trigger`.  Marked accessed.
    pub fn retrieve_by_trigger(&self, trigger: &str, k: usize) -> Vec<EpisodeMemory> {
        let mut state = self.state.lock();
        let mut hits: Vec<(DateTime<Utc>, String)> = state
            .trigger_index
            .get(trigger)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.episodes.get(id).map(|e| (e.base.timestamp, id.clone())))
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.0.cmp(&a.0));
        hits.truncate(k);
        touch_locked(&mut state, hits.into_iter().map(|(_, id)| (id, 1.0)), Utc::now())
            .into_iter()
            .map(|(ep, _)| ep)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<EpisodeMemory> {
        self.state.lock().episodes.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().episodes.contains_key(id)
    }

    /// Episodes within `window` of `id`'s timestamp, closest first.
    /// Empty when `id` is unknown.
    pub fn get_temporal_neighbors(&self, id: &str, window: Duration) -> Vec<EpisodeMemory> {
        let state = self.state.lock();
        let Some(anchor) = state.episodes.get(id).map(|e| e.base.timestamp) else {
            return Vec::new();
        };
        let window = window.abs();
        let lower = anchor.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let upper = anchor.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut neighbours: Vec<(Duration, &EpisodeMemory)> = state
            .timeline
            .range((lower, String::new())..)
            .take_while(|(ts, _)| *ts <= upper)
            .filter(|(_, other)| other != id)
            .filter_map(|(ts, other)| state.episodes.get(other).map(|e| ((*ts - anchor).abs(), e)))
            .collect();
        neighbours.sort_by(|a, b| a.0.cmp(&b.0));
        neighbours.into_iter().map(|(_, e)| e.clone()).collect()
    }

    /// Episodes with `start <= timestamp <= end`, oldest first.
    pub fn get_episodes_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<EpisodeMemory> {
        if end < start {
            return Vec::new();
        }
        let state = self.state.lock();
        state
            .timeline
            .range((start, String::new())..)
            .take_while(|(ts, _)| *ts <= end)
            .filter_map(|(_, id)| state.episodes.get(id).cloned())
            .collect()
    }

    /// Every detected sequence, strongest first.
    pub fn get_sequences(&self) -> Vec<Sequence> {
        let state = self.state.lock();
        let mut sequences: Vec<Sequence> = state.sequences.values().cloned().collect();
        sequences.sort_by(|a, b| b.pattern_strength.total_cmp(&a.pattern_strength).then(a.created_at.cmp(&b.created_at)));
        sequences
    }

    pub fn get_sequence(&self, sequence_id: &str) -> Option<Sequence> {
        self.state.lock().sequences.get(sequence_id).cloned()
    }

    /// Apply `update` to the episode's base fields.  `false` for unknown ids.
    pub fn update(&self, id: &str, update: &MemoryUpdate) -> bool {
        let mut state = self.state.lock();
        match state.episodes.get_mut(id) {
            Some(ep) => {
                update.apply_to(&mut ep.base);
                debug!(id = %id, "updated episode");
                true
            }
            None => false,
        }
    }

    /// Remove `id` from every index and sequence.  `false` if unknown.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = remove_locked(&mut state, id);
        if removed {
            debug!(id = %id, "deleted episode");
        }
        removed
    }

    pub fn clear(&self) {
        *self.state.lock() = EpisodicState::default();
        info!("cleared episodic memory");
    }

    pub fn len(&self) -> usize {
        self.state.lock().episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EpisodicStats {
        let state = self.state.lock();
        let now = Utc::now();
        let count = state.episodes.len();
        let average_importance = if count == 0 {
            0.0
        } else {
            state.episodes.values().map(|e| e.base.current_importance_at(now)).sum::<f64>() / count as f64
        };
        EpisodicStats {
            count,
            capacity: self.capacity,
            sequence_count: state.sequences.len(),
            distinct_triggers: state.trigger_index.len(),
            distinct_context_pairs: state.context_index.len(),
            buffered_recent: state.recent.len(),
            oldest: state.timeline.first().map(|(ts, _)| *ts),
            newest: state.timeline.last().map(|(ts, _)| *ts),
            average_importance,
        }
    }

    fn evict_locked(&self, state: &mut EpisodicState) {
        let excess = state.episodes.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let now = Utc::now();
        let mut ranked: Vec<(f64, DateTime<Utc>, String)> = state
            .episodes
            .values()
            .map(|e| (e.base.current_importance_at(now), e.base.timestamp, e.base.id.clone()))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, _, id) in ranked.into_iter().take(excess) {
            remove_locked(state, &id);
        }
        info!(evicted = excess, capacity = self.capacity, "episodic capacity eviction");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers (caller holds the lock)
// ─────────────────────────────────────────────────────────────────────────────

fn index_locked(state: &mut EpisodicState, episode: EpisodeMemory) {
    let id = episode.base.id.clone();
    state.timeline.insert((episode.base.timestamp, id.clone()));
    for (key, value) in &episode.context {
        state
            .context_index
            .entry((key.clone(), value_key(value)))
            .or_default()
            .insert(id.clone());
    }
    for trigger in &episode.triggers {
        state.trigger_index.entry(trigger.clone()).or_default().insert(id.clone());
    }
    state.episodes.insert(id, episode);
}

fn remove_locked(state: &mut EpisodicState, id: &str) -> bool {
    let Some(episode) = state.episodes.remove(id) else {
        return false;
    };
    state.timeline.remove(&(episode.base.timestamp, id.to_string()));
    for (key, value) in &episode.context {
        let pair = (key.clone(), value_key(value));
        if let Some(ids) = state.context_index.get_mut(&pair) {
            ids.remove(id);
            if ids.is_empty() {
                state.context_index.remove(&pair);
            }
        }
    }
    for trigger in &episode.triggers {
        if let Some(ids) = state.trigger_index.get_mut(trigger) {
            ids.remove(id);
            if ids.is_empty() {
                state.trigger_index.remove(trigger);
            }
        }
    }
    state.recent.retain(|r| r != id);
    for sequence in state.sequences.values_mut() {
        sequence.episode_ids.retain(|e| e != id);
    }
    true
}

/// Blank text matches nothing.
fn text_matches(state: &EpisodicState, text: &str) -> HashMap<String, f64> {
    let mut matches = HashMap::new();
    if text.trim().is_empty() {
        return matches;
    }
    if let Some(ids) = state.trigger_index.get(text) {
        for id in ids {
            matches.insert(id.clone(), 1.0);
        }
    }
    let needle = text.to_lowercase();
    for (id, ep) in &state.episodes {
        if !matches.contains_key(id) && ep.base.content.to_lowercase().contains(&needle) {
            matches.insert(id.clone(), 0.5);
        }
    }
    matches
}

fn context_matches(state: &EpisodicState, attrs: &Metadata) -> HashMap<String, f64> {
    if attrs.is_empty() {
        return HashMap::new();
    }
    let mut hits: HashMap<String, usize> = HashMap::new();
    for (key, value) in attrs {
        if let Some(ids) = state.context_index.get(&(key.clone(), value_key(value))) {
            for id in ids {
                *hits.entry(id.clone()).or_default() += 1;
            }
        }
    }
    let total = attrs.len() as f64;
    hits.into_iter().map(|(id, n)| (id, n as f64 / total)).collect()
}

fn touch_locked(
    state: &mut EpisodicState,
    ranked: impl IntoIterator<Item = (String, f64)>,
    now: DateTime<Utc>,
) -> Vec<(EpisodeMemory, f64)> {
    ranked
        .into_iter()
        .filter_map(|(id, score)| {
            let ep = state.episodes.get_mut(&id)?;
            ep.base.record_access_at(now);
            Some((ep.clone(), score))
        })
        .collect()
}

fn detect_patterns_locked(state: &mut EpisodicState) {
    let recent: Vec<&String> = state
        .recent
        .iter()
        .rev()
        .take(PATTERN_SCAN_LEN)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    // signature -> (count, episodes of every matching window)
    let mut histogram: HashMap<Vec<String>, (usize, Vec<String>)> = HashMap::new();
    for end in 0..recent.len() {
        let start = (end + 1).saturating_sub(PATTERN_WINDOW);
        let window = &recent[start..=end];
        let signature: Vec<String> = window
            .iter()
            .filter_map(|id| state.episodes.get(*id))
            .flat_map(|e| e.triggers.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if signature.is_empty() {
            continue;
        }
        let entry = histogram.entry(signature).or_default();
        entry.0 += 1;
        for id in window {
            if !entry.1.contains(*id) {
                entry.1.push((*id).clone());
            }
        }
    }

    let now = Utc::now();
    for (signature, (count, ids)) in histogram {
        if count < PATTERN_MIN_COUNT {
            continue;
        }
        let strength = (count as f64 / 10.0).min(1.0);
        match state.sequence_by_signature.get(&signature).cloned() {
            Some(sequence_id) => {
                let Some(sequence) = state.sequences.get_mut(&sequence_id) else {
                    continue;
                };
                for id in ids {
                    if !sequence.episode_ids.contains(&id) {
                        sequence.episode_ids.push(id);
                    }
                }
                sequence.pattern_strength = strength;
                sequence.updated_at = now;
                debug!(sequence_id = %sequence_id, strength, "refreshed sequence");
            }
            None => {
                let sequence_id = Uuid::new_v4().to_string();
                info!(sequence_id = %sequence_id, signature = ?signature, strength, "detected recurring sequence");
                state.sequence_by_signature.insert(signature.clone(), sequence_id.clone());
                state.sequences.insert(
                    sequence_id.clone(),
                    Sequence {
                        sequence_id,
                        episode_ids: ids,
                        sequence_type: "recurring_pattern".to_string(),
                        pattern_strength: strength,
                        signature,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }
}
