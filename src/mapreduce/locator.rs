//! Partition ownership snapshot

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{TopKError, TopKResult};
use crate::storage::{NodeId, PartitionDirectory, PartitionId};

/// One partition and the node owning it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionAssignment {
    pub partition: PartitionId,
    pub node: NodeId,
}

/// Ordered, duplicate-free partition ownership taken at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionMap {
    assignments: Vec<PartitionAssignment>,
}

impl PartitionMap {
    /// Build a snapshot, rejecting partitions claimed by two different nodes
    pub fn from_pairs(pairs: Vec<(PartitionId, NodeId)>) -> TopKResult<Self> {
        let mut owners: BTreeMap<PartitionId, NodeId> = BTreeMap::new();
        for (partition, node) in pairs {
            match owners.get(&partition) {
                Some(existing) if *existing != node => {
                    return Err(TopKError::topology(format!(
                        "partition {partition} reported on both {existing} and {node}"
                    )));
                }
                Some(_) => debug!("Partition {} listed twice for {}", partition, node),
                None => {
                    owners.insert(partition, node);
                }
            }
        }

        Ok(Self {
            assignments: owners
                .into_iter()
                .map(|(partition, node)| PartitionAssignment { partition, node })
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartitionAssignment> {
        self.assignments.iter()
    }

    pub fn partitions(&self) -> Vec<PartitionId> {
        self.assignments.iter().map(|a| a.partition).collect()
    }

    pub fn owner(&self, partition: PartitionId) -> Option<&NodeId> {
        self.assignments
            .binary_search_by_key(&partition, |a| a.partition)
            .ok()
            .map(|i| &self.assignments[i].node)
    }
}

/// Resolves the partition-to-node assignment of the fact table
pub struct PartitionLocator {
    directory: Arc<dyn PartitionDirectory>,
}

impl PartitionLocator {
    pub fn new(directory: Arc<dyn PartitionDirectory>) -> Self {
        Self { directory }
    }

    /// Take one ownership snapshot for the duration of a run
    pub async fn partitions(&self) -> TopKResult<PartitionMap> {
        let pairs = self.directory.primary_replicas().await.map_err(|source| {
            warn!("Partition directory lookup failed: {}", source);
            TopKError::TopologyUnavailable {
                reason: "partition directory lookup failed".to_string(),
                source: Some(source),
            }
        })?;

        let map = PartitionMap::from_pairs(pairs)?;
        if map.is_empty() {
            return Err(TopKError::topology("partition directory returned no partitions"));
        }

        debug!("Resolved ownership of {} partitions", map.len());
        Ok(map)
    }
}
