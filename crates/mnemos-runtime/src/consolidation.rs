//! Working-memory consolidation.
//!
//! A consolidation pass promotes working items into long-term storage under
//! the same id and then drops them from working memory.
//!
//! | long-term target | written when |
//! |---|---|
//! | semantic | the item has context tags (category = first tag, concept = content) |
//! | episodic | the metadata carries a timestamp, or the item was accessed more than 3 times |
//! | vector | always |
//!
//! A target that already holds the id is left untouched.  The new references
//! are cross-connected at the item's working importance and inherit the
//! working reference's links.  An item whose every long-term write failed
//! stays in working memory and is retried on the next pass.

use chrono::Utc;
use mnemos_memory::{EpisodeMemory, SemanticNode, WorkingMemoryItem};
use mnemos_types::{MemoryError, MemoryType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cross_links::MemoryRef;
use crate::hybrid::{HybridMemorySystem, metadata_timestamp};
use crate::routing::TIMESTAMP_KEY;

/// Accesses above which a working item also becomes an episode.
pub const EPISODIC_ACCESS_THRESHOLD: u64 = 3;

const CONSOLIDATION_SOURCE: &str = "consolidation";

/// One promoted working item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedItem {
    pub id: String,
    /// Long-term references now holding the item.
    pub written: Vec<MemoryRef>,
    pub working_importance: f64,
}

/// Outcome of [`HybridMemorySystem::consolidate_memories`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Working items considered.
    pub examined: usize,
    pub consolidated: Vec<ConsolidatedItem>,
    /// Items kept in working memory because no long-term write succeeded.
    pub failed: Vec<(String, MemoryError)>,
    /// Requested ids not present in working memory.
    pub missing: Vec<String>,
}

impl HybridMemorySystem {
    /// Promote working items into long-term memory.
    ///
    /// With `ids`, exactly those items are promoted regardless of their
    /// importance.  Without, every item whose working importance reaches
    /// `consolidation_threshold` is.
    pub fn consolidate_memories(&self, ids: Option<&[String]>) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();
        let candidates: Vec<WorkingMemoryItem> = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    let item = self.subsystems.working.get(id);
                    if item.is_none() {
                        report.missing.push(id.clone());
                    }
                    item
                })
                .collect(),
            None => self.subsystems.working.consolidation_candidates(self.config.consolidation_threshold),
        };
        report.examined = candidates.len();

        for item in candidates {
            let id = item.base.id.clone();
            match self.consolidate_item(item) {
                Ok(done) => report.consolidated.push(done),
                Err(e) => {
                    warn!(id = %id, error = %e, "consolidation failed, keeping working item");
                    report.failed.push((id, e));
                }
            }
        }

        {
            let mut coordination = self.coordination.lock();
            for done in &report.consolidated {
                coordination.candidates.remove(&done.id);
            }
            coordination.last_consolidation = Utc::now();
        }

        info!(
            examined = report.examined,
            consolidated = report.consolidated.len(),
            failed = report.failed.len(),
            "consolidation pass"
        );
        report
    }

    fn consolidate_item(&self, item: WorkingMemoryItem) -> Result<ConsolidatedItem, MemoryError> {
        let now = Utc::now();
        let id = item.base.id.clone();
        let working_importance = item.working_importance_at(now);
        let mut written = Vec::new();
        let mut errors = Vec::new();

        if let Some(category) = item.context_tags.iter().next() {
            if !self.subsystems.semantic.contains(&id) {
                let node = SemanticNode::new(item.base.clone(), item.base.content.clone(), category.clone())
                    .with_source(CONSOLIDATION_SOURCE);
                self.subsystems.semantic.store(node);
            }
            written.push(MemoryRef::new(MemoryType::Semantic, &id));
        }

        if item.base.metadata.contains_key(TIMESTAMP_KEY) || item.base.access_count > EPISODIC_ACCESS_THRESHOLD {
            if !self.subsystems.episodic.contains(&id) {
                let mut base = item.base.clone();
                if let Some(ts) = metadata_timestamp(&base.metadata) {
                    base = base.with_timestamp(ts);
                }
                let episode = EpisodeMemory::new(base)
                    .with_context(item.base.metadata.clone())
                    .with_triggers(item.context_tags.iter().cloned());
                self.subsystems.episodic.store(episode);
            }
            written.push(MemoryRef::new(MemoryType::Episodic, &id));
        }

        if self.subsystems.vector.contains(&id) {
            written.push(MemoryRef::new(MemoryType::Vector, &id));
        } else {
            match self.subsystems.vector.store(item.base.clone(), None) {
                Ok(_) => written.push(MemoryRef::new(MemoryType::Vector, &id)),
                Err(e) => errors.push(format!("{}: {e}", MemoryType::Vector)),
            }
        }

        if written.is_empty() {
            return Err(MemoryError::StoreFailed(errors.join("; ")));
        }

        if self.config.enable_cross_connections {
            let mut links = self.cross_links.lock();
            let working_ref = MemoryRef::new(MemoryType::Working, &id);
            let inherited = links.connections_of(&working_ref);
            links.remove_ref(&working_ref);
            links.connect_all(&written, working_importance);
            for node in &written {
                for (other, strength) in &inherited {
                    links.connect(node, other, *strength);
                }
            }
        }

        self.subsystems.working.delete(&id);
        debug!(id = %id, written = written.len(), importance = working_importance, "consolidated working item");
        Ok(ConsolidatedItem { id, written, working_importance })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::routing::{MemoryTarget, RetrieveHints, StoreHints};
    use mnemos_types::{MemoryConfiguration, Metadata, Query};

    fn system_with(cfg: MemoryConfiguration) -> HybridMemorySystem {
        HybridMemorySystem::new(MemoryConfiguration { vector_dimension: 128, ..cfg }).unwrap()
    }

    fn system() -> HybridMemorySystem {
        system_with(MemoryConfiguration::default())
    }

    fn working_only() -> MemoryTarget {
        MemoryType::Working.into()
    }

    #[tokio::test]
    async fn urgent_working_item_moves_to_long_term_memory() {
        let memory = system();
        let hints = StoreHints { priority: Some(9), ..Default::default() };
        let report = memory
            .store("credit limit increased to $5000", Metadata::new(), working_only(), hints)
            .unwrap();
        assert!(memory.working().contains(&report.id));
        assert!(!memory.vector().contains(&report.id));

        let pass = memory.consolidate_memories(None);
        assert_eq!(pass.consolidated.len(), 1);
        assert_eq!(pass.consolidated[0].written, vec![MemoryRef::new(MemoryType::Vector, &report.id)]);
        assert!(!memory.working().contains(&report.id));
        assert!(memory.vector().contains(&report.id));

        let result = memory
            .retrieve(Query::text("credit limit"), 5, Some(&[MemoryType::Working]), false, RetrieveHints::default())
            .await;
        assert!(result.working.iter().all(|(w, _)| w.base.id != report.id));
    }

    #[test]
    fn tagged_item_becomes_a_semantic_node() {
        let memory = system();
        let hints = StoreHints {
            priority: Some(9),
            context_tags: BTreeSet::from(["billing".to_string(), "accounts".to_string()]),
            ..Default::default()
        };
        let report = memory.store("invoice overdue", Metadata::new(), working_only(), hints).unwrap();
        memory.consolidate_memories(None);
        let node = memory.semantic().get(&report.id).unwrap();
        assert_eq!(node.category, "accounts");
        assert_eq!(node.concept, "invoice overdue");
    }

    #[test]
    fn frequently_accessed_item_also_becomes_an_episode() {
        let memory = system();
        let report = memory
            .store("recurring deploy checklist", Metadata::new(), working_only(), StoreHints {
                priority: Some(3),
                ..Default::default()
            })
            .unwrap();
        for _ in 0..6 {
            assert!(memory.working().activate_item(&report.id, None));
        }

        let pass = memory.consolidate_memories(None);
        let types: Vec<MemoryType> = pass.consolidated[0].written.iter().map(|r| r.memory_type).collect();
        assert_eq!(types, vec![MemoryType::Episodic, MemoryType::Vector]);
        assert!(memory.episodic().contains(&report.id));
        assert!(!memory.working().contains(&report.id));
    }

    #[test]
    fn consolidation_rewires_cross_connections() {
        let memory = system();
        let hints = StoreHints {
            context_tags: BTreeSet::from(["ops".to_string()]),
            ..Default::default()
        };
        let report = memory.store("rotate tls certificates", Metadata::new(), MemoryTarget::Auto, hints).unwrap();
        let working_ref = MemoryRef::new(MemoryType::Working, &report.id);
        let vector_ref = MemoryRef::new(MemoryType::Vector, &report.id);
        assert_eq!(memory.cross_connections(&working_ref).len(), 1);

        memory.consolidate_memories(Some(&[report.id.clone()]));

        assert!(memory.cross_connections(&working_ref).is_empty());
        let semantic_ref = MemoryRef::new(MemoryType::Semantic, &report.id);
        let links = memory.cross_connections(&vector_ref);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, semantic_ref);
        assert!(memory.cross_connections(&semantic_ref).iter().any(|(r, _)| *r == vector_ref));
    }

    #[test]
    fn existing_long_term_entries_are_not_overwritten() {
        let memory = system();
        let vector: Vec<f32> = (0..128).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let hints = StoreHints { vector: Some(vector.clone()), priority: Some(9), ..Default::default() };
        let report = memory.store("pinned embedding", Metadata::new(), MemoryTarget::Auto, hints).unwrap();

        memory.consolidate_memories(Some(&[report.id.clone()]));
        assert_eq!(memory.vector().get(&report.id).unwrap().vector, vector);
    }

    #[test]
    fn missing_ids_are_reported() {
        let memory = system();
        let pass = memory.consolidate_memories(Some(&["ghost".to_string()]));
        assert_eq!(pass.examined, 0);
        assert_eq!(pass.missing, vec!["ghost".to_string()]);
    }

    #[test]
    fn store_triggers_automatic_consolidation_at_batch_size() {
        let memory = system_with(MemoryConfiguration { consolidation_batch_size: 2, ..Default::default() });
        let hints = || StoreHints { priority: Some(10), temporary: true, ..Default::default() };
        let first = memory.store("first urgent note", Metadata::new(), MemoryTarget::Auto, hints()).unwrap();
        assert!(memory.working().contains(&first.id));

        let second = memory.store("second urgent note", Metadata::new(), MemoryTarget::Auto, hints()).unwrap();
        assert!(memory.working().is_empty());
        assert!(memory.vector().contains(&first.id));
        assert!(memory.vector().contains(&second.id));
        assert_eq!(memory.get_stats().pending_consolidation, 0);
    }
}
