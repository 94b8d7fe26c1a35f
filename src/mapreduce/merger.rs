//! Reduction of partial rankings into the global top-K
//!
//! Partials arrive already ranked, so the common case is a K-way merge: a
//! max-heap holds the head of every non-empty partial and the global best is
//! popped until `k` entries are out, `O(N·K log N)` for `N` partials.
//!
//! Colocation is not taken on faith. When one entity key shows up in more
//! than one partial, its totals are summed before ranking and the key is
//! reported as a colocation violation.

use rust_decimal::Decimal;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

use super::types::{GlobalTopK, PartialResult, RankKey, RankedEntry};
use crate::storage::EntityKey;

/// Output of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub top: GlobalTopK,
    /// Keys found in more than one partial, ascending
    pub duplicate_keys: Vec<EntityKey>,
}

/// Merges partial results into a global top-K
#[derive(Debug, Clone, Copy)]
pub struct ReduceMerger {
    k: usize,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapHead {
    rank: RankKey,
    partial: usize,
    position: usize,
}

impl ReduceMerger {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    /// Merge partials; arrival order does not affect the result
    pub fn merge(&self, partials: &[PartialResult]) -> MergeOutcome {
        let duplicate_keys = find_duplicate_keys(partials);

        let ranked = if duplicate_keys.is_empty() {
            self.kway_merge(partials)
        } else {
            warn!(
                "{} entity keys span several partitions; summing their partial totals",
                duplicate_keys.len()
            );
            self.summing_merge(partials)
        };

        debug!(
            "Merged {} partials into {} ranked entries",
            partials.len(),
            ranked.len()
        );

        MergeOutcome {
            top: GlobalTopK::from_ranked(self.k, ranked),
            duplicate_keys,
        }
    }

    fn kway_merge(&self, partials: &[PartialResult]) -> Vec<RankedEntry> {
        let mut heap: BinaryHeap<HeapHead> = partials
            .iter()
            .enumerate()
            .filter_map(|(index, partial)| {
                partial.entries().first().map(|head| HeapHead {
                    rank: head.rank_key(),
                    partial: index,
                    position: 0,
                })
            })
            .collect();

        let available: usize = partials.iter().map(PartialResult::len).sum();
        let mut ranked = Vec::with_capacity(self.k.min(available));
        while ranked.len() < self.k {
            let Some(head) = heap.pop() else {
                break;
            };
            let entries = partials[head.partial].entries();
            ranked.push(RankedEntry::from(entries[head.position]));

            let next = head.position + 1;
            if let Some(entry) = entries.get(next) {
                heap.push(HeapHead {
                    rank: entry.rank_key(),
                    partial: head.partial,
                    position: next,
                });
            }
        }
        ranked
    }

    fn summing_merge(&self, partials: &[PartialResult]) -> Vec<RankedEntry> {
        let mut totals: HashMap<EntityKey, Decimal> = HashMap::new();
        for entry in partials.iter().flat_map(|p| p.entries()) {
            let total = totals.entry(entry.entity_key).or_insert(Decimal::ZERO);
            *total = total.saturating_add(entry.total);
        }

        let mut ranked: Vec<RankedEntry> = totals
            .into_iter()
            .map(|(entity_key, total)| RankedEntry::new(entity_key, total))
            .collect();
        ranked.sort_unstable_by(|a, b| b.rank_key().cmp(&a.rank_key()));
        ranked.truncate(self.k);
        ranked
    }
}

/// Keys held by more than one partial; each partial counts a key once
fn find_duplicate_keys(partials: &[PartialResult]) -> Vec<EntityKey> {
    let mut counts: HashMap<EntityKey, usize> = HashMap::new();
    for partial in partials {
        let keys: HashSet<EntityKey> = partial.entries().iter().map(|e| e.entity_key).collect();
        for key in keys {
            *counts.entry(key).or_default() += 1;
        }
    }

    let mut duplicates: Vec<EntityKey> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key)
        .collect();
    duplicates.sort_unstable();
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::types::{is_ranked, rank_descending, KeyTotal};
    use crate::storage::PartitionId;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const A: EntityKey = 1;
    const B: EntityKey = 2;
    const C: EntityKey = 3;
    const D: EntityKey = 4;

    fn partial(partition: u32, k: usize, pairs: &[(EntityKey, i64)]) -> PartialResult {
        PartialResult::new(
            PartitionId(partition),
            k,
            pairs
                .iter()
                .map(|(key, total)| KeyTotal::new(*key, Decimal::from(*total)))
                .collect(),
        )
    }

    fn keys_and_totals(outcome: &MergeOutcome) -> Vec<(EntityKey, Decimal)> {
        outcome.top.iter().map(|e| (e.entity_key, e.total)).collect()
    }

    #[test]
    fn test_three_partition_scenario() {
        let partials = vec![
            partial(0, 2, &[(A, 100), (B, 50)]),
            partial(1, 2, &[(C, 80)]),
            partial(2, 2, &[(D, 200)]),
        ];

        let outcome = ReduceMerger::new(2).merge(&partials);

        assert_eq!(
            keys_and_totals(&outcome),
            vec![(D, Decimal::from(200)), (A, Decimal::from(100))]
        );
        assert!(outcome.duplicate_keys.is_empty());
        assert!(outcome.top.iter().all(|e| e.attributes.is_none()));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut partials = vec![
            partial(0, 3, &[(10, 7), (11, 5), (12, 5)]),
            partial(1, 3, &[(20, 7), (21, 6)]),
            partial(2, 3, &[(30, 5)]),
        ];
        let forward = ReduceMerger::new(3).merge(&partials);
        partials.reverse();
        let backward = ReduceMerger::new(3).merge(&partials);

        assert_eq!(forward, backward);
        let keys: Vec<EntityKey> = forward.top.iter().map(|e| e.entity_key).collect();
        assert_eq!(keys, vec![10, 20, 21]);
    }

    #[test]
    fn test_k_larger_than_distinct_keys_returns_all_without_padding() {
        let partials = vec![partial(0, 10, &[(A, 1), (B, 2)]), partial(1, 10, &[(C, 3)])];
        let outcome = ReduceMerger::new(10).merge(&partials);

        assert_eq!(outcome.top.len(), 3);
        assert!(is_ranked(outcome.top.entries()));
    }

    #[test]
    fn test_no_partials_merge_to_empty() {
        let outcome = ReduceMerger::new(5).merge(&[]);
        assert!(outcome.top.is_empty());

        let outcome = ReduceMerger::new(5).merge(&[partial(0, 5, &[])]);
        assert!(outcome.top.is_empty());
    }

    #[test]
    fn test_negative_totals_rank_below_zero() {
        let partials = vec![partial(0, 3, &[(A, -10), (B, 0)]), partial(1, 3, &[(C, -1)])];
        let outcome = ReduceMerger::new(3).merge(&partials);
        let keys: Vec<EntityKey> = outcome.top.iter().map(|e| e.entity_key).collect();
        assert_eq!(keys, vec![B, C, A]);
    }

    #[test]
    fn test_keys_spanning_partitions_are_summed_and_reported() {
        let partials = vec![
            partial(0, 2, &[(A, 100), (B, 50)]),
            partial(1, 2, &[(B, 70), (C, 80)]),
        ];

        let outcome = ReduceMerger::new(2).merge(&partials);

        assert_eq!(outcome.duplicate_keys, vec![B]);
        assert_eq!(
            keys_and_totals(&outcome),
            vec![(B, Decimal::from(120)), (A, Decimal::from(100))]
        );
    }

    #[test]
    fn test_key_repeated_within_one_partial_is_not_a_colocation_violation() {
        let partials = vec![
            partial(0, 3, &[(A, 30), (B, 20), (A, 15)]),
            partial(1, 3, &[(C, 40)]),
        ];

        let outcome = ReduceMerger::new(3).merge(&partials);

        assert!(outcome.duplicate_keys.is_empty());
        assert_eq!(
            keys_and_totals(&outcome),
            vec![
                (A, Decimal::from(45)),
                (C, Decimal::from(40)),
                (B, Decimal::from(20))
            ]
        );
    }

    fn total() -> impl Strategy<Value = Decimal> {
        (-1_000_000i64..1_000_000, 0u32..4)
            .prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
    }

    /// Up to six partials drawing from a shared pool of keys, so some
    /// keys land in several partials
    fn arb_partials(pool: EntityKey) -> impl Strategy<Value = Vec<PartialResult>> {
        prop::collection::vec(
            (prop::collection::vec((0..pool, total()), 0..12), 0usize..8),
            0..6,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(index, (pairs, k))| {
                    let entries = pairs
                        .into_iter()
                        .map(|(key, total)| KeyTotal::new(key, total))
                        .collect();
                    PartialResult::new(PartitionId(index as u32), k, entries)
                })
                .collect()
        })
    }

    fn summed_reference(partials: &[PartialResult], k: usize) -> Vec<(EntityKey, Decimal)> {
        let mut totals: BTreeMap<EntityKey, Decimal> = BTreeMap::new();
        for entry in partials.iter().flat_map(|p| p.entries()) {
            let total = totals.entry(entry.entity_key).or_insert(Decimal::ZERO);
            *total = total.saturating_add(entry.total);
        }
        let mut entries: Vec<KeyTotal> = totals
            .into_iter()
            .map(|(key, total)| KeyTotal::new(key, total))
            .collect();
        entries.sort_by(rank_descending);
        entries.truncate(k);
        entries.into_iter().map(|e| (e.entity_key, e.total)).collect()
    }

    proptest! {
        #[test]
        fn test_merge_matches_summed_reference(partials in arb_partials(40), k in 0usize..15) {
            let outcome = ReduceMerger::new(k).merge(&partials);

            prop_assert!(is_ranked(outcome.top.entries()));
            prop_assert!(outcome.top.len() <= k);
            prop_assert_eq!(keys_and_totals(&outcome), summed_reference(&partials, k));

            let mut holders: BTreeMap<EntityKey, usize> = BTreeMap::new();
            for partial in &partials {
                for entry in partial.entries() {
                    *holders.entry(entry.entity_key).or_default() += 1;
                }
            }
            let spanning: Vec<EntityKey> = holders
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(key, _)| key)
                .collect();
            prop_assert_eq!(outcome.duplicate_keys, spanning);
        }

        #[test]
        fn test_merge_ignores_arrival_order(
            partials in arb_partials(40),
            k in 0usize..15,
            rotation in 0usize..6,
        ) {
            let forward = ReduceMerger::new(k).merge(&partials);

            let mut shuffled = partials.clone();
            shuffled.reverse();
            if !shuffled.is_empty() {
                let shift = rotation % shuffled.len();
                shuffled.rotate_left(shift);
            }
            prop_assert_eq!(forward, ReduceMerger::new(k).merge(&shuffled));
        }

        #[test]
        fn test_colocated_partials_have_no_duplicates(
            partials in arb_partials(40),
            k in 0usize..15,
        ) {
            // Key spaces made disjoint per partition
            let colocated: Vec<PartialResult> = partials
                .iter()
                .map(|p| {
                    let entries = p
                        .entries()
                        .iter()
                        .map(|e| KeyTotal::new(e.entity_key * 8 + i64::from(p.partition().0), e.total))
                        .collect();
                    PartialResult::new(p.partition(), p.k(), entries)
                })
                .collect();

            let outcome = ReduceMerger::new(k).merge(&colocated);

            prop_assert!(outcome.duplicate_keys.is_empty());
            prop_assert_eq!(outcome.top.len(), k.min(colocated.iter().map(PartialResult::len).sum()));
            prop_assert_eq!(keys_and_totals(&outcome), summed_reference(&colocated, k));
        }
    }
}
