//! Testing utilities and fault injection
//!
//! Wrappers around the storage and transport seams that fail, stall, or
//! corrupt output on chosen partitions, so degraded runs can be driven
//! deterministically from tests and benchmarks.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::mapreduce::{AggregationJob, JobError, JobTransport};
use crate::storage::{
    AttributeStore, EntityAttributes, EntityKey, NodeId, PartitionDirectory, PartitionId,
    RowSource, RowStream, StorageError, StorageResult,
};

/// Fault applied to scans of one partition
#[derive(Debug, Clone)]
pub enum ScanFault {
    /// Opening the cursor fails every time
    FailAtOpen,
    /// The cursor yields this many rows, then an error
    FailAfter(usize),
    /// Opening fails this many times, then succeeds
    FailTimes(u32),
    /// The cursor is opened, then held idle for this long before rows flow
    Delay(Duration),
}

/// Row source that injects [`ScanFault`]s per partition
pub struct FaultyRowSource {
    inner: Arc<dyn RowSource>,
    faults: HashMap<PartitionId, ScanFault>,
    failures: Mutex<HashMap<PartitionId, u32>>,
}

impl FaultyRowSource {
    pub fn new(inner: Arc<dyn RowSource>) -> Self {
        Self {
            inner,
            faults: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fault(mut self, partition: PartitionId, fault: ScanFault) -> Self {
        self.faults.insert(partition, fault);
        self
    }

    pub fn fail_at_open(self, partition: PartitionId) -> Self {
        self.with_fault(partition, ScanFault::FailAtOpen)
    }

    pub fn fail_after(self, partition: PartitionId, rows: usize) -> Self {
        self.with_fault(partition, ScanFault::FailAfter(rows))
    }

    pub fn fail_times(self, partition: PartitionId, times: u32) -> Self {
        self.with_fault(partition, ScanFault::FailTimes(times))
    }

    pub fn delay(self, partition: PartitionId, delay: Duration) -> Self {
        self.with_fault(partition, ScanFault::Delay(delay))
    }

    /// Scans of `partition` that have failed so far
    pub fn failures(&self, partition: PartitionId) -> u32 {
        self.failures
            .lock()
            .map(|failures| failures.get(&partition).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_failure(&self, partition: PartitionId) -> u32 {
        match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(partition).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => u32::MAX,
        }
    }
}

#[async_trait]
impl RowSource for FaultyRowSource {
    async fn scan(&self, partition: PartitionId) -> StorageResult<RowStream> {
        match self.faults.get(&partition) {
            None => self.inner.scan(partition).await,
            Some(ScanFault::FailAtOpen) => {
                self.record_failure(partition);
                Err(StorageError::scan(partition, "injected open failure"))
            }
            Some(ScanFault::FailTimes(times)) => {
                if self.failures(partition) < *times {
                    self.record_failure(partition);
                    return Err(StorageError::scan(partition, "injected transient failure"));
                }
                self.inner.scan(partition).await
            }
            Some(ScanFault::FailAfter(rows)) => {
                let rows = *rows;
                let cursor = self.inner.scan(partition).await?;
                let failure = stream::once(async move {
                    Err(StorageError::scan(
                        partition,
                        format!("injected failure after {rows} rows"),
                    ))
                });
                Ok(cursor.take(rows).chain(failure).boxed())
            }
            Some(ScanFault::Delay(delay)) => {
                let cursor = self.inner.scan(partition).await?;
                tokio::time::sleep(*delay).await;
                Ok(cursor)
            }
        }
    }
}

/// Transport answering with undecodable bytes for chosen partitions
pub struct GarbageTransport {
    inner: Arc<dyn JobTransport>,
    corrupt: Vec<PartitionId>,
}

impl GarbageTransport {
    pub fn new(inner: Arc<dyn JobTransport>, corrupt: impl IntoIterator<Item = PartitionId>) -> Self {
        Self {
            inner,
            corrupt: corrupt.into_iter().collect(),
        }
    }
}

#[async_trait]
impl JobTransport for GarbageTransport {
    async fn submit(&self, node: &NodeId, job: AggregationJob) -> Result<Vec<u8>, JobError> {
        if self.corrupt.contains(&job.partition) {
            return Ok(b"\x00\xffnot a partial".to_vec());
        }
        self.inner.submit(node, job).await
    }
}

/// Directory returning a fixed partition listing
pub struct StaticDirectory {
    replicas: Vec<(PartitionId, NodeId)>,
}

impl StaticDirectory {
    pub fn new(replicas: Vec<(PartitionId, NodeId)>) -> Self {
        Self { replicas }
    }
}

#[async_trait]
impl PartitionDirectory for StaticDirectory {
    async fn primary_replicas(&self) -> StorageResult<Vec<(PartitionId, NodeId)>> {
        Ok(self.replicas.clone())
    }
}

/// Directory that cannot be reached
pub struct UnavailableDirectory;

#[async_trait]
impl PartitionDirectory for UnavailableDirectory {
    async fn primary_replicas(&self) -> StorageResult<Vec<(PartitionId, NodeId)>> {
        Err(StorageError::unavailable("partition directory unreachable"))
    }
}

/// Attribute store failing every lookup
pub struct BrokenAttributeStore;

#[async_trait]
impl AttributeStore for BrokenAttributeStore {
    async fn lookup(&self, _entity_key: EntityKey) -> StorageResult<Option<EntityAttributes>> {
        Err(StorageError::unavailable("attribute store offline"))
    }
}
