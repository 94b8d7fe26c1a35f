//! Type definitions shared between the storage layer and the aggregation engine

use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::StorageResult;

/// Aggregation key of a fact row (the customer id for invoice lines)
pub type EntityKey = i64;

/// Identifier of a disjoint shard of the fact table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node owning one or more partitions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A single fact produced by the storage layer. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRow {
    pub entity_key: EntityKey,
    pub amount: Decimal,
    pub partition: PartitionId,
}

impl FactRow {
    pub fn new(entity_key: EntityKey, amount: Decimal, partition: PartitionId) -> Self {
        Self {
            entity_key,
            amount,
            partition,
        }
    }
}

/// Descriptive attributes attached to a ranked entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAttributes {
    pub name: String,
    pub locality: String,
    pub region: String,
}

impl EntityAttributes {
    pub fn new(
        name: impl Into<String>,
        locality: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            locality: locality.into(),
            region: region.into(),
        }
    }

    /// Sentinel attributes used when a lookup misses
    pub fn unknown(label: &str) -> Self {
        Self::new(label, label, label)
    }
}

/// Owned, cancellable stream of rows local to one partition.
///
/// Dropping the stream closes the underlying cursor.
pub type RowStream = BoxStream<'static, StorageResult<FactRow>>;
