//! Structured error types for the top-K pipeline
//!
//! Only [`TopKError`] aborts a run. [`JobError`] is confined to one
//! partition job and [`EnrichmentMiss`] to one ranked entry; both end up in
//! the run report instead of failing the computation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state_machine::StateError;
use crate::storage::{EntityKey, NodeId, PartitionId, StorageError};

/// Whole-run errors
#[derive(Debug, Error)]
pub enum TopKError {
    #[error("Partition topology unavailable: {reason}")]
    TopologyUnavailable {
        reason: String,
        #[source]
        source: Option<StorageError>,
    },

    #[error("Invalid top-k request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Run state error: {0}")]
    State(#[from] StateError),
}

impl TopKError {
    pub fn topology<S: Into<String>>(reason: S) -> Self {
        Self::TopologyUnavailable {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn is_topology_unavailable(&self) -> bool {
        matches!(self, Self::TopologyUnavailable { .. })
    }
}

pub type TopKResult<T> = Result<T, TopKError>;

/// Failure of a single partition job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Scan of partition {partition} failed: {source}")]
    PartitionScanFailed {
        partition: PartitionId,
        #[source]
        source: StorageError,
    },

    #[error("Running total of entity {entity_key} overflowed in partition {partition}")]
    AccumulatorOverflow {
        partition: PartitionId,
        entity_key: EntityKey,
    },

    #[error("Marshaling error: {0}")]
    Marshaling(#[from] MarshalError),

    #[error("Dispatch to node {node} failed: {reason}")]
    Transport { node: NodeId, reason: String },
}

impl JobError {
    /// Whether resubmitting the same job may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PartitionScanFailed { source, .. } => source.is_retryable(),
            Self::Transport { .. } => true,
            Self::AccumulatorOverflow { .. } | Self::Marshaling(_) => false,
        }
    }
}

/// Errors decoding or encoding a partial result
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("malformed partial result payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid decimal {value:?} for entity {entity_key}")]
    InvalidDecimal { entity_key: EntityKey, value: String },

    #[error("payload carries {len} entries but k is {k}")]
    TooManyEntries { len: usize, k: usize },

    #[error("entity {0} appears twice in one partial result")]
    DuplicateEntity(EntityKey),

    #[error("expected a partial result for partition {expected} with k={expected_k}, got partition {found} with k={found_k}")]
    UnexpectedJob {
        expected: PartitionId,
        expected_k: usize,
        found: PartitionId,
        found_k: usize,
    },
}

/// A ranked entry whose attributes could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichmentMiss {
    #[error("entity {entity_key} not found in attribute store")]
    NotFound { entity_key: EntityKey },

    #[error("attribute lookup for entity {entity_key} failed: {reason}")]
    LookupFailed { entity_key: EntityKey, reason: String },
}

impl EnrichmentMiss {
    pub fn entity_key(&self) -> EntityKey {
        match self {
            Self::NotFound { entity_key } | Self::LookupFailed { entity_key, .. } => *entity_key,
        }
    }
}
