//! In-memory partitioned store
//!
//! Holds a fact table split into partitions spread round-robin over nodes,
//! plus the attribute records used for enrichment. Facts are routed to the
//! partition owning their entity key, so every row of one entity lives in a
//! single partition (colocation by key). `insert_fact_at` bypasses routing
//! to model stores that do not enforce colocation.

use async_trait::async_trait;
use futures::Stream;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::{AttributeStore, PartitionDirectory, RowSource},
    types::{EntityAttributes, EntityKey, FactRow, NodeId, PartitionId, RowStream},
};

/// Builder for [`InMemoryCluster`]
#[derive(Debug)]
pub struct ClusterBuilder {
    partitions: u32,
    nodes: Vec<NodeId>,
    rows: HashMap<PartitionId, Vec<FactRow>>,
    attributes: HashMap<EntityKey, EntityAttributes>,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            partitions: 1,
            nodes: vec![NodeId::new("node-0")],
            rows: HashMap::new(),
            attributes: HashMap::new(),
        }
    }
}

impl ClusterBuilder {
    /// Number of partitions of the fact table
    pub fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// Nodes the partitions are spread over
    pub fn nodes<I, N>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Insert a fact into the partition owning its entity key
    pub fn insert_fact(mut self, entity_key: EntityKey, amount: Decimal) -> Self {
        let partition = partition_for(entity_key, self.partitions);
        self.push_row(FactRow::new(entity_key, amount, partition));
        self
    }

    /// Insert a fact into an explicit partition, ignoring key routing
    pub fn insert_fact_at(
        mut self,
        partition: PartitionId,
        entity_key: EntityKey,
        amount: Decimal,
    ) -> Self {
        self.push_row(FactRow::new(entity_key, amount, partition));
        self
    }

    /// Register enrichment attributes for an entity
    pub fn insert_attributes(mut self, entity_key: EntityKey, attributes: EntityAttributes) -> Self {
        self.attributes.insert(entity_key, attributes);
        self
    }

    fn push_row(&mut self, row: FactRow) {
        self.rows.entry(row.partition).or_default().push(row);
    }

    /// Validate the layout and freeze the cluster
    pub fn build(self) -> StorageResult<InMemoryCluster> {
        if self.partitions == 0 {
            return Err(StorageError::configuration(
                "cluster needs at least one partition",
            ));
        }
        if self.nodes.is_empty() {
            return Err(StorageError::configuration("cluster needs at least one node"));
        }
        if let Some(stray) = self.rows.keys().find(|p| p.0 >= self.partitions) {
            return Err(StorageError::configuration(format!(
                "row stored in partition {stray} but the cluster only has {} partitions",
                self.partitions
            )));
        }

        let assignments: BTreeMap<PartitionId, NodeId> = (0..self.partitions)
            .map(|p| {
                let node = self.nodes[p as usize % self.nodes.len()].clone();
                (PartitionId(p), node)
            })
            .collect();

        debug!(
            "Built in-memory cluster with {} partitions over {} nodes",
            self.partitions,
            self.nodes.len()
        );

        Ok(InMemoryCluster {
            assignments,
            rows: self.rows.into_iter().map(|(p, r)| (p, Arc::new(r))).collect(),
            attributes: self.attributes,
            open_cursors: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// Partition owning an entity key: key modulo partition count
pub fn partition_for(entity_key: EntityKey, partitions: u32) -> PartitionId {
    PartitionId(entity_key.rem_euclid(i64::from(partitions.max(1))) as u32)
}

/// In-memory partitioned fact table with a colocated attribute store
#[derive(Debug)]
pub struct InMemoryCluster {
    assignments: BTreeMap<PartitionId, NodeId>,
    rows: HashMap<PartitionId, Arc<Vec<FactRow>>>,
    attributes: HashMap<EntityKey, EntityAttributes>,
    open_cursors: Arc<AtomicUsize>,
}

impl InMemoryCluster {
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::default()
    }

    pub fn partition_count(&self) -> usize {
        self.assignments.len()
    }

    /// Owner of a partition
    pub fn owner(&self, partition: PartitionId) -> Option<&NodeId> {
        self.assignments.get(&partition)
    }

    /// Number of rows stored in a partition
    pub fn row_count(&self, partition: PartitionId) -> usize {
        self.rows.get(&partition).map_or(0, |rows| rows.len())
    }

    /// Cursors opened by `scan` and not yet dropped
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartitionDirectory for InMemoryCluster {
    async fn primary_replicas(&self) -> StorageResult<Vec<(PartitionId, NodeId)>> {
        Ok(self
            .assignments
            .iter()
            .map(|(partition, node)| (*partition, node.clone()))
            .collect())
    }
}

#[async_trait]
impl RowSource for InMemoryCluster {
    async fn scan(&self, partition: PartitionId) -> StorageResult<RowStream> {
        if !self.assignments.contains_key(&partition) {
            return Err(StorageError::not_found(format!("partition {partition}")));
        }
        let rows = self.rows.get(&partition).cloned().unwrap_or_default();
        Ok(Box::pin(MemoryCursor::open(rows, Arc::clone(&self.open_cursors))))
    }
}

#[async_trait]
impl AttributeStore for InMemoryCluster {
    async fn lookup(&self, entity_key: EntityKey) -> StorageResult<Option<EntityAttributes>> {
        Ok(self.attributes.get(&entity_key).cloned())
    }
}

/// Cursor over a partition snapshot; releases its slot when dropped
struct MemoryCursor {
    rows: Arc<Vec<FactRow>>,
    position: usize,
    open: Arc<AtomicUsize>,
}

impl MemoryCursor {
    fn open(rows: Arc<Vec<FactRow>>, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            rows,
            position: 0,
            open,
        }
    }
}

impl Stream for MemoryCursor {
    type Item = StorageResult<FactRow>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Poll::Ready(row.map(Ok))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rows.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
