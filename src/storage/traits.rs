//! Core trait definitions for the storage collaborators
//!
//! The aggregation engine never talks to a concrete store. Partition
//! ownership, row scans and attribute lookups all go through these traits so
//! the engine can run against a real cluster client or the in-memory backend.

use async_trait::async_trait;

use super::error::StorageResult;
use super::types::{EntityAttributes, EntityKey, NodeId, PartitionId, RowStream};

/// Partition directory of the fact table
#[async_trait]
pub trait PartitionDirectory: Send + Sync {
    /// Current primary owner of every partition
    async fn primary_replicas(&self) -> StorageResult<Vec<(PartitionId, NodeId)>>;
}

/// Per-partition scan primitive
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Open a cursor over the rows stored in `partition`
    async fn scan(&self, partition: PartitionId) -> StorageResult<RowStream>;
}

/// Point lookup of enrichment records
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Look up the attributes of an entity; `Ok(None)` when the key is unknown
    async fn lookup(&self, entity_key: EntityKey) -> StorageResult<Option<EntityAttributes>>;
}
