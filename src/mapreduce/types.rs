//! Value types flowing through the top-K pipeline

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;

use crate::storage::{EntityAttributes, EntityKey, PartitionId};

/// The single job contract shipped to a partition owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationJob {
    pub partition: PartitionId,
    pub k: usize,
}

impl AggregationJob {
    pub fn new(partition: PartitionId, k: usize) -> Self {
        Self { partition, k }
    }
}

/// Ordering key of a ranked pair: higher total first, then lower entity key.
///
/// The greatest `RankKey` is the best rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankKey {
    total: Decimal,
    entity_key: Reverse<EntityKey>,
}

impl RankKey {
    pub fn new(total: Decimal, entity_key: EntityKey) -> Self {
        Self {
            total,
            entity_key: Reverse(entity_key),
        }
    }
}

/// An `(entity_key, total)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTotal {
    pub entity_key: EntityKey,
    pub total: Decimal,
}

impl KeyTotal {
    pub fn new(entity_key: EntityKey, total: Decimal) -> Self {
        Self { entity_key, total }
    }

    pub fn rank_key(&self) -> RankKey {
        RankKey::new(self.total, self.entity_key)
    }
}

/// Comparator putting the best-ranked pair first
pub fn rank_descending(a: &KeyTotal, b: &KeyTotal) -> Ordering {
    b.rank_key().cmp(&a.rank_key())
}

/// Local top-K of one partition, best rank first, at most `k` entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    partition: PartitionId,
    k: usize,
    entries: Vec<KeyTotal>,
}

impl PartialResult {
    /// Build a partial result; repeated keys are summed, then entries are
    /// ranked and truncated to `k`
    pub fn new(partition: PartitionId, k: usize, mut entries: Vec<KeyTotal>) -> Self {
        entries.sort_by_key(|entry| entry.entity_key);
        entries.dedup_by(|repeat, kept| {
            if repeat.entity_key != kept.entity_key {
                return false;
            }
            kept.total = kept.total.saturating_add(repeat.total);
            true
        });
        entries.sort_by(rank_descending);
        entries.truncate(k);
        Self {
            partition,
            k,
            entries,
        }
    }

    pub fn empty(partition: PartitionId, k: usize) -> Self {
        Self::new(partition, k, Vec::new())
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn entries(&self) -> &[KeyTotal] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One row of the final ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub entity_key: EntityKey,
    pub total: Decimal,
    /// Unset until the enricher has run
    pub attributes: Option<EntityAttributes>,
}

impl RankedEntry {
    pub fn new(entity_key: EntityKey, total: Decimal) -> Self {
        Self {
            entity_key,
            total,
            attributes: None,
        }
    }

    pub fn rank_key(&self) -> RankKey {
        RankKey::new(self.total, self.entity_key)
    }

    pub fn is_enriched(&self) -> bool {
        self.attributes.is_some()
    }
}

impl From<KeyTotal> for RankedEntry {
    fn from(pair: KeyTotal) -> Self {
        Self::new(pair.entity_key, pair.total)
    }
}

/// Globally ranked top-K.
///
/// Invariants: at most `k` entries, non-increasing by total, ties ordered by
/// ascending key, no entity key twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalTopK {
    k: usize,
    entries: Vec<RankedEntry>,
}

impl GlobalTopK {
    pub(crate) fn from_ranked(k: usize, mut entries: Vec<RankedEntry>) -> Self {
        entries.truncate(k);
        debug_assert!(is_ranked(&entries), "global top-k must be ranked");
        Self { k, entries }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [RankedEntry] {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<RankedEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RankedEntry> {
        self.entries.iter()
    }

    /// Entry at a 1-based rank
    pub fn at_rank(&self, rank: usize) -> Option<&RankedEntry> {
        rank.checked_sub(1).and_then(|i| self.entries.get(i))
    }
}

impl<'a> IntoIterator for &'a GlobalTopK {
    type Item = &'a RankedEntry;
    type IntoIter = std::slice::Iter<'a, RankedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Strictly descending by rank key, which also rules out duplicate keys
pub fn is_ranked(entries: &[RankedEntry]) -> bool {
    let mut seen = HashSet::with_capacity(entries.len());
    entries.iter().all(|e| seen.insert(e.entity_key))
        && entries
            .windows(2)
            .all(|pair| pair[0].rank_key() > pair[1].rank_key())
}
