//! Attribute enrichment of the final ranking
//!
//! Lookups for all unenriched entries run concurrently and are written back
//! in place, so rank order never changes. A miss or a failed lookup leaves
//! the entry in its slot with sentinel attributes.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::EnrichmentMiss;
use super::types::GlobalTopK;
use crate::storage::{AttributeStore, EntityAttributes, EntityKey};

/// Default label of sentinel attributes
pub const UNKNOWN_LABEL: &str = "unknown";

/// Fills descriptive attributes of ranked entries
pub struct Enricher {
    store: Arc<dyn AttributeStore>,
    unknown_label: String,
}

impl Enricher {
    pub fn new(store: Arc<dyn AttributeStore>) -> Self {
        Self {
            store,
            unknown_label: UNKNOWN_LABEL.to_string(),
        }
    }

    /// Use a custom label for sentinel attributes
    pub fn with_unknown_label(mut self, label: impl Into<String>) -> Self {
        self.unknown_label = label.into();
        self
    }

    /// Enrich every entry that has no attributes yet.
    ///
    /// Already enriched entries are left untouched, so running this twice
    /// yields the same ranking. Returns the misses of this pass.
    pub async fn enrich(&self, top: &mut GlobalTopK) -> Vec<EnrichmentMiss> {
        let pending: Vec<(usize, EntityKey)> = top
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_enriched())
            .map(|(index, entry)| (index, entry.entity_key))
            .collect();

        if pending.is_empty() {
            return Vec::new();
        }

        let lookups = join_all(pending.into_iter().map(|(index, entity_key)| async move {
            (index, entity_key, self.store.lookup(entity_key).await)
        }))
        .await;

        let entries = top.entries_mut();
        let mut misses = Vec::new();
        for (index, entity_key, lookup) in lookups {
            let attributes = match lookup {
                Ok(Some(attributes)) => attributes,
                Ok(None) => {
                    debug!("No attributes for entity {}", entity_key);
                    misses.push(EnrichmentMiss::NotFound { entity_key });
                    EntityAttributes::unknown(&self.unknown_label)
                }
                Err(e) => {
                    warn!("Attribute lookup for entity {} failed: {}", entity_key, e);
                    misses.push(EnrichmentMiss::LookupFailed {
                        entity_key,
                        reason: e.to_string(),
                    });
                    EntityAttributes::unknown(&self.unknown_label)
                }
            };
            entries[index].attributes = Some(attributes);
        }

        misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::types::{KeyTotal, PartialResult};
    use crate::mapreduce::ReduceMerger;
    use crate::storage::{InMemoryCluster, PartitionId, StorageError, StorageResult};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn ranking(pairs: &[(EntityKey, i64)]) -> GlobalTopK {
        let partial = PartialResult::new(
            PartitionId(0),
            pairs.len(),
            pairs
                .iter()
                .map(|(key, total)| KeyTotal::new(*key, Decimal::from(*total)))
                .collect(),
        );
        ReduceMerger::new(pairs.len()).merge(&[partial]).top
    }

    fn store() -> Arc<InMemoryCluster> {
        Arc::new(
            InMemoryCluster::builder()
                .insert_attributes(2, EntityAttributes::new("Bjørn Hansen", "Oslo", "Norway"))
                .insert_attributes(3, EntityAttributes::new("Emma Jones", "London", "UK"))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_miss_on_top_entry_keeps_rank_with_sentinel() {
        let mut top = ranking(&[(1, 300), (2, 200), (3, 100)]);
        let misses = Enricher::new(store()).enrich(&mut top).await;

        assert_eq!(misses, vec![EnrichmentMiss::NotFound { entity_key: 1 }]);
        let first = top.at_rank(1).unwrap();
        assert_eq!(first.entity_key, 1);
        assert_eq!(first.attributes, Some(EntityAttributes::unknown("unknown")));
        assert_eq!(top.at_rank(2).unwrap().attributes.as_ref().unwrap().locality, "Oslo");
        assert_eq!(top.at_rank(3).unwrap().attributes.as_ref().unwrap().region, "UK");
    }

    #[tokio::test]
    async fn test_enrichment_is_idempotent() {
        let mut top = ranking(&[(1, 300), (2, 200)]);
        let enricher = Enricher::new(store());
        enricher.enrich(&mut top).await;
        let once = top.clone();

        let misses = enricher.enrich(&mut top).await;
        assert!(misses.is_empty());
        assert_eq!(top, once);
    }

    #[tokio::test]
    async fn test_custom_unknown_label() {
        let mut top = ranking(&[(9, 1)]);
        Enricher::new(store())
            .with_unknown_label("n/a")
            .enrich(&mut top)
            .await;
        assert_eq!(top.at_rank(1).unwrap().attributes.as_ref().unwrap().name, "n/a");
    }

    struct BrokenStore;

    #[async_trait]
    impl AttributeStore for BrokenStore {
        async fn lookup(&self, _entity_key: EntityKey) -> StorageResult<Option<EntityAttributes>> {
            Err(StorageError::unavailable("attribute store offline"))
        }
    }

    #[tokio::test]
    async fn test_failed_lookups_are_not_fatal() {
        let mut top = ranking(&[(1, 2), (2, 1)]);
        let misses = Enricher::new(Arc::new(BrokenStore)).enrich(&mut top).await;

        assert_eq!(misses.len(), 2);
        assert!(matches!(misses[0], EnrichmentMiss::LookupFailed { entity_key: 1, .. }));
        assert!(top.iter().all(|e| e.is_enriched()));
        assert_eq!(top.len(), 2);
    }

    proptest! {
        #[test]
        fn test_second_pass_changes_nothing(
            entities in prop::collection::btree_map(
                -50i64..50,
                ((-10_000i64..10_000, 0u32..3), any::<bool>()),
                0..25,
            ),
            k in 0usize..30,
        ) {
            let mut builder = InMemoryCluster::builder();
            let mut totals = Vec::with_capacity(entities.len());
            let mut known: BTreeMap<EntityKey, String> = BTreeMap::new();
            for (key, ((mantissa, scale), has_attributes)) in entities {
                totals.push(KeyTotal::new(key, Decimal::new(mantissa, scale)));
                if has_attributes {
                    let name = format!("Customer {key}");
                    builder = builder.insert_attributes(key, EntityAttributes::new(name.clone(), "City", "Country"));
                    known.insert(key, name);
                }
            }
            let enricher = Enricher::new(Arc::new(builder.build().unwrap()));
            let partial = PartialResult::new(PartitionId(0), k, totals);
            let mut top = ReduceMerger::new(k).merge(&[partial]).top;
            let order: Vec<EntityKey> = top.iter().map(|e| e.entity_key).collect();

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let first = runtime.block_on(enricher.enrich(&mut top));
            let once = top.clone();
            let second = runtime.block_on(enricher.enrich(&mut top));

            prop_assert!(second.is_empty());
            prop_assert_eq!(&top, &once);
            prop_assert_eq!(top.iter().map(|e| e.entity_key).collect::<Vec<_>>(), order);
            prop_assert_eq!(first.len(), top.iter().filter(|e| !known.contains_key(&e.entity_key)).count());
            for entry in top.iter() {
                let name = &entry.attributes.as_ref().unwrap().name;
                match known.get(&entry.entity_key) {
                    Some(expected) => prop_assert_eq!(name, expected),
                    None => prop_assert_eq!(name.as_str(), UNKNOWN_LABEL),
                }
            }
        }
    }
}
