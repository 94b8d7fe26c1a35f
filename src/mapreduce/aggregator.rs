//! Per-partition aggregation job
//!
//! Streams the rows of one partition into a private accumulator, then keeps
//! the `k` best-ranked totals. The cursor is owned by the job: it is drained
//! on success and dropped (closed) on every early exit, including a
//! cancelled job future.

use futures::StreamExt;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::errors::JobError;
use super::types::{rank_descending, AggregationJob, KeyTotal, PartialResult};
use crate::storage::{EntityKey, PartitionId, RowSource};

/// Running per-key totals of one partition job
#[derive(Debug)]
pub struct Accumulator {
    partition: PartitionId,
    totals: HashMap<EntityKey, Decimal>,
    rows: u64,
}

impl Accumulator {
    pub fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            totals: HashMap::new(),
            rows: 0,
        }
    }

    /// Merge-add an amount into the running total of `entity_key`
    pub fn add(&mut self, entity_key: EntityKey, amount: Decimal) -> Result<(), JobError> {
        let total = self.totals.entry(entity_key).or_insert(Decimal::ZERO);
        *total = total
            .checked_add(amount)
            .ok_or(JobError::AccumulatorOverflow {
                partition: self.partition,
                entity_key,
            })?;
        self.rows += 1;
        Ok(())
    }

    pub fn total(&self, entity_key: EntityKey) -> Option<Decimal> {
        self.totals.get(&entity_key).copied()
    }

    /// Number of distinct keys seen
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows
    }

    /// The `k` best-ranked totals, best first
    pub fn into_top(self, k: usize) -> Vec<KeyTotal> {
        if k == 0 {
            return Vec::new();
        }

        let mut entries: Vec<KeyTotal> = self
            .totals
            .into_iter()
            .map(|(entity_key, total)| KeyTotal::new(entity_key, total))
            .collect();

        if entries.len() > k {
            entries.select_nth_unstable_by(k - 1, rank_descending);
            entries.truncate(k);
        }
        entries.sort_unstable_by(rank_descending);
        entries
    }
}

/// Runs aggregation jobs against a row source
#[derive(Clone)]
pub struct LocalAggregator {
    source: Arc<dyn RowSource>,
}

impl LocalAggregator {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self { source }
    }

    /// Aggregate one partition into its local top-K
    pub async fn run(&self, job: AggregationJob) -> Result<PartialResult, JobError> {
        let started = Instant::now();
        let partition = job.partition;

        let mut cursor = self
            .source
            .scan(partition)
            .await
            .map_err(|source| JobError::PartitionScanFailed { partition, source })?;

        let mut accumulator = Accumulator::new(partition);
        let mut foreign_rows = 0u64;

        while let Some(row) = cursor.next().await {
            let row = row.map_err(|source| JobError::PartitionScanFailed { partition, source })?;
            if row.partition != partition {
                foreign_rows += 1;
                continue;
            }
            accumulator.add(row.entity_key, row.amount)?;
        }
        drop(cursor);

        if foreign_rows > 0 {
            warn!(
                "Skipped {} rows of other partitions while scanning partition {}",
                foreign_rows, partition
            );
        }

        debug!(
            "Partition {} aggregated {} rows into {} keys in {:?}",
            partition,
            accumulator.rows_seen(),
            accumulator.len(),
            started.elapsed()
        );

        Ok(PartialResult::new(partition, job.k, accumulator.into_top(job.k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::types::RankKey;
    use crate::storage::InMemoryCluster;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn test_accumulator_merges_amounts_exactly() {
        let mut acc = Accumulator::new(PartitionId(0));
        for _ in 0..10 {
            acc.add(1, dec("0.10")).unwrap();
        }
        acc.add(2, dec("-5.00")).unwrap();

        assert_eq!(acc.total(1), Some(dec("1.00")));
        assert_eq!(acc.total(2), Some(dec("-5.00")));
        assert_eq!(acc.rows_seen(), 11);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_accumulator_reports_overflow() {
        let mut acc = Accumulator::new(PartitionId(4));
        acc.add(1, Decimal::MAX).unwrap();
        let err = acc.add(1, Decimal::ONE).unwrap_err();
        assert!(matches!(
            err,
            JobError::AccumulatorOverflow {
                partition: PartitionId(4),
                entity_key: 1
            }
        ));
    }

    #[test]
    fn test_into_top_truncates_with_tie_break() {
        let mut acc = Accumulator::new(PartitionId(0));
        acc.add(5, dec("10")).unwrap();
        acc.add(3, dec("10")).unwrap();
        acc.add(9, dec("30")).unwrap();
        acc.add(1, dec("1")).unwrap();

        let top = acc.into_top(3);
        let keys: Vec<EntityKey> = top.iter().map(|e| e.entity_key).collect();
        assert_eq!(keys, vec![9, 3, 5]);
    }

    #[test]
    fn test_into_top_with_large_k_returns_everything() {
        let mut acc = Accumulator::new(PartitionId(0));
        acc.add(1, dec("1")).unwrap();
        acc.add(2, dec("2")).unwrap();
        assert_eq!(acc.into_top(10).len(), 2);
    }

    #[tokio::test]
    async fn test_run_aggregates_only_its_partition() {
        let cluster = Arc::new(
            InMemoryCluster::builder()
                .partitions(2)
                .insert_fact(2, dec("4.50"))
                .insert_fact(2, dec("0.50"))
                .insert_fact(4, dec("1.25"))
                .insert_fact(3, dec("99.00"))
                .build()
                .unwrap(),
        );
        let aggregator = LocalAggregator::new(cluster.clone());

        let partial = aggregator
            .run(AggregationJob::new(PartitionId(0), 5))
            .await
            .unwrap();

        assert_eq!(
            partial.entries(),
            &[KeyTotal::new(2, dec("5.00")), KeyTotal::new(4, dec("1.25"))]
        );
        assert_eq!(cluster.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_run_with_zero_k_still_drains() {
        let cluster = Arc::new(
            InMemoryCluster::builder()
                .insert_fact(1, dec("1"))
                .build()
                .unwrap(),
        );
        let partial = LocalAggregator::new(cluster.clone())
            .run(AggregationJob::new(PartitionId(0), 0))
            .await
            .unwrap();
        assert!(partial.is_empty());
        assert_eq!(cluster.open_cursors(), 0);
    }

    proptest! {
        #[test]
        fn test_into_top_is_the_ranked_prefix_of_all_totals(
            rows in prop::collection::vec(
                (-20i64..20, -100_000i64..100_000, 0u32..5),
                0..200,
            ),
            k in 0usize..50,
        ) {
            let mut acc = Accumulator::new(PartitionId(0));
            let mut expected: BTreeMap<EntityKey, Decimal> = BTreeMap::new();
            for (key, mantissa, scale) in rows {
                let amount = Decimal::new(mantissa, scale);
                acc.add(key, amount).unwrap();
                *expected.entry(key).or_insert(Decimal::ZERO) += amount;
            }
            let distinct = expected.len();

            let top = acc.into_top(k);

            prop_assert_eq!(top.len(), k.min(distinct));
            prop_assert!(top
                .windows(2)
                .all(|pair| pair[0].rank_key() > pair[1].rank_key()));

            let mut reference: Vec<(EntityKey, Decimal)> = expected.into_iter().collect();
            reference.sort_by_key(|(key, total)| std::cmp::Reverse(RankKey::new(*total, *key)));
            reference.truncate(k);
            let got: Vec<(EntityKey, Decimal)> =
                top.iter().map(|e| (e.entity_key, e.total)).collect();
            prop_assert_eq!(got, reference);
        }
    }
}
