//! Storage collaborators of the aggregation engine
//!
//! The engine treats storage as an external service exposing a partition
//! directory, a per-partition row scan and a key-value attribute lookup.
//! This module defines those seams and ships an in-memory backend that
//! honours them for the CLI and the tests.

pub mod backends;
pub mod error;
pub mod traits;
pub mod types;

pub use backends::{ClusterLayout, InMemoryCluster};
pub use error::{StorageError, StorageResult};
pub use traits::{AttributeStore, PartitionDirectory, RowSource};
pub use types::{EntityAttributes, EntityKey, FactRow, NodeId, PartitionId, RowStream};
