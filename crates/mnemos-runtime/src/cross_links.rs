//! Cross-connection index.
//!
//! Symmetric, weighted links between memory references of possibly
//! different subsystems.  A link records that two entries belong to the same
//! logical item (co-stored, or consolidated from working memory); it never
//! implies ownership.
//!
//! Invariants:
//!
//! - `a → b` exists iff `b → a` exists, with the same strength.
//! - No reference links to itself.
//! - No reference holds more than `max_per_item` links; adding one more
//!   drops the weakest link of the saturated side (on both ends).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use mnemos_types::{MemoryConfiguration, MemoryError, MemoryType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A subsystem-tagged id, rendered as `"type:id"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryRef {
    pub memory_type: MemoryType,
    pub id: String,
}

impl MemoryRef {
    pub fn new(memory_type: MemoryType, id: impl Into<String>) -> Self {
        Self { memory_type, id: id.into() }
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.memory_type, self.id)
    }
}

impl FromStr for MemoryRef {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| MemoryError::InvalidConfiguration(format!("malformed memory reference: {s}")))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Aggregate counts for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossConnectionStats {
    /// References with at least one link.
    pub connected_refs: usize,
    /// Undirected links.
    pub links: usize,
    pub average_degree: f64,
    pub max_degree: usize,
}

#[derive(Debug, Clone)]
pub struct CrossConnectionIndex {
    threshold: f64,
    max_per_item: usize,
    links: HashMap<MemoryRef, HashMap<MemoryRef, f64>>,
}

impl CrossConnectionIndex {
    pub fn new(threshold: f64, max_per_item: usize) -> Self {
        Self { threshold, max_per_item: max_per_item.max(1), links: HashMap::new() }
    }

    pub fn from_config(config: &MemoryConfiguration) -> Self {
        Self::new(config.cross_connection_threshold, config.max_cross_connections)
    }

    /// Link `a` and `b` with `strength`.  Returns `false` for self-links and
    /// links weaker than the threshold.  Re-linking keeps the stronger value.
    pub fn connect(&mut self, a: &MemoryRef, b: &MemoryRef, strength: f64) -> bool {
        if a == b || strength < self.threshold {
            return false;
        }
        let strength = strength.clamp(0.0, 1.0);
        let current = self.strength(a, b).unwrap_or(0.0).max(strength);
        self.links.entry(a.clone()).or_default().insert(b.clone(), current);
        self.links.entry(b.clone()).or_default().insert(a.clone(), current);
        self.enforce_cap(a);
        self.enforce_cap(b);
        true
    }

    /// Link every pair in `refs`.  Returns the number of links accepted.
    pub fn connect_all(&mut self, refs: &[MemoryRef], strength: f64) -> usize {
        let mut accepted = 0;
        for (i, a) in refs.iter().enumerate() {
            for b in &refs[i + 1..] {
                if self.connect(a, b, strength) {
                    accepted += 1;
                }
            }
        }
        accepted
    }

    fn enforce_cap(&mut self, node: &MemoryRef) {
        loop {
            let Some(neighbours) = self.links.get(node) else {
                return;
            };
            if neighbours.len() <= self.max_per_item {
                return;
            }
            let Some(weakest) = neighbours
                .iter()
                .min_by(|x, y| x.1.total_cmp(y.1).then_with(|| y.0.cmp(x.0)))
                .map(|(r, _)| r.clone())
            else {
                return;
            };
            self.unlink(node, &weakest);
            debug!(from = %node, to = %weakest, "dropped weakest cross-connection");
        }
    }

    fn unlink(&mut self, a: &MemoryRef, b: &MemoryRef) {
        for (x, y) in [(a, b), (b, a)] {
            if let Some(neighbours) = self.links.get_mut(x) {
                neighbours.remove(y);
                if neighbours.is_empty() {
                    self.links.remove(x);
                }
            }
        }
    }

    pub fn strength(&self, a: &MemoryRef, b: &MemoryRef) -> Option<f64> {
        self.links.get(a).and_then(|n| n.get(b)).copied()
    }

    /// Links of `node`, strongest first.
    pub fn connections_of(&self, node: &MemoryRef) -> Vec<(MemoryRef, f64)> {
        let mut out: Vec<(MemoryRef, f64)> = self
            .links
            .get(node)
            .map(|n| n.iter().map(|(r, s)| (r.clone(), *s)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Remove every link of `node`.  Returns the number removed.
    pub fn remove_ref(&mut self, node: &MemoryRef) -> usize {
        let Some(neighbours) = self.links.remove(node) else {
            return 0;
        };
        for other in neighbours.keys() {
            if let Some(back) = self.links.get_mut(other) {
                back.remove(node);
                if back.is_empty() {
                    self.links.remove(other);
                }
            }
        }
        neighbours.len()
    }

    /// Remove every link of `id` under any subsystem tag.
    pub fn remove_id(&mut self, id: &str) -> usize {
        MemoryType::ALL
            .into_iter()
            .map(|t| self.remove_ref(&MemoryRef::new(t, id)))
            .sum()
    }

    pub fn is_connected(&self, node: &MemoryRef) -> bool {
        self.links.contains_key(node)
    }

    /// Undirected link count.
    pub fn link_count(&self) -> usize {
        self.links.values().map(HashMap::len).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }

    pub fn stats(&self) -> CrossConnectionStats {
        let connected_refs = self.links.len();
        let degrees: Vec<usize> = self.links.values().map(HashMap::len).collect();
        CrossConnectionStats {
            connected_refs,
            links: self.link_count(),
            average_degree: if connected_refs == 0 {
                0.0
            } else {
                degrees.iter().sum::<usize>() as f64 / connected_refs as f64
            },
            max_degree: degrees.into_iter().max().unwrap_or(0),
        }
    }
}
