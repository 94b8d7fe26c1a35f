//! Scatter/gather coordination of a top-K run
//!
//! One aggregation job is dispatched per partition to the partition's
//! primary owner. Jobs run concurrently and are collected until they are all
//! in or the fan-in deadline passes. Jobs still outstanding at the deadline
//! are cancelled and their partitions reported as timed out; the ranking is
//! then built from whatever partials arrived.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::enricher::Enricher;
use super::errors::{JobError, TopKError, TopKResult};
use super::locator::{PartitionLocator, PartitionMap};
use super::marshal::ResultMarshaler;
use super::merger::ReduceMerger;
use super::report::{Completeness, PartitionReport, PartitionStatus, TopKReport};
use super::state_machine::{RunTracker, RunTransition};
use super::transport::JobTransport;
use super::types::{AggregationJob, PartialResult};
use crate::config::TopKConfig;
use crate::storage::{AttributeStore, NodeId, PartitionDirectory, PartitionId};

/// Resubmission settings for failed jobs
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

/// Bookkeeping for one dispatched job
struct JobSlot {
    partition: PartitionId,
    node: NodeId,
    attempts: Arc<AtomicU32>,
    dispatched: Instant,
}

impl JobSlot {
    fn report(&self, status: PartitionStatus) -> PartitionReport {
        PartitionReport {
            partition: self.partition,
            node: self.node.clone(),
            status,
            attempts: self.attempts.load(Ordering::SeqCst),
            duration: self.dispatched.elapsed(),
        }
    }
}

/// Partials gathered during fan-in, with a report line per partition
struct Collected {
    partials: Vec<PartialResult>,
    partitions: Vec<PartitionReport>,
}

/// Drives a top-K run from partition discovery to the enriched ranking
pub struct Orchestrator {
    locator: PartitionLocator,
    transport: Arc<dyn JobTransport>,
    enricher: Enricher,
    config: TopKConfig,
}

impl Orchestrator {
    pub fn new(
        directory: Arc<dyn PartitionDirectory>,
        transport: Arc<dyn JobTransport>,
        attributes: Arc<dyn AttributeStore>,
        config: TopKConfig,
    ) -> Self {
        let enricher = Enricher::new(attributes).with_unknown_label(config.unknown_label.clone());
        Self {
            locator: PartitionLocator::new(directory),
            transport,
            enricher,
            config,
        }
    }

    pub fn config(&self) -> &TopKConfig {
        &self.config
    }

    /// Compute the top-K with the configured `k`
    pub async fn run(&self) -> TopKResult<TopKReport> {
        self.compute_top_k(self.config.k).await
    }

    /// Compute the `k` entities with the highest totals across all partitions.
    ///
    /// Fails only when the request is invalid or the partition topology
    /// cannot be resolved. Job failures and timeouts degrade the report
    /// instead.
    pub async fn compute_top_k(&self, k: usize) -> TopKResult<TopKReport> {
        if k == 0 {
            return Err(TopKError::InvalidRequest {
                reason: "k must be at least 1".to_string(),
            });
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("top_k", run_id = %run_id, k);
        self.execute(run_id, k).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid, k: usize) -> TopKResult<TopKReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut tracker = RunTracker::new();

        let map = match self.locator.partitions().await {
            Ok(map) => map,
            Err(e) => {
                error!("Cannot resolve partitions: {}", e);
                tracker.advance(RunTransition::Fail)?;
                return Err(e);
            }
        };
        tracker.advance(RunTransition::Resolve)?;
        info!("Resolved {} partitions", map.len());

        let (mut jobs, slots) = self.dispatch(&map, k);
        tracker.advance(RunTransition::Dispatch)?;

        let collected = self.collect(&mut jobs, slots).await;
        tracker.advance(RunTransition::Collect)?;

        let completeness = Completeness::from_partitions(&collected.partitions);
        if let Completeness::Degraded { failed, timed_out } = &completeness {
            warn!(
                "Ranking is degraded: {} partitions failed, {} timed out",
                failed.len(),
                timed_out.len()
            );
        }

        let mut outcome = ReduceMerger::new(k).merge(&collected.partials);
        tracker.advance(RunTransition::Merge)?;

        let enrichment_misses = self.enricher.enrich(&mut outcome.top).await;
        tracker.advance(RunTransition::Enrich)?;
        tracker.advance(RunTransition::Finish)?;

        let report = TopKReport {
            run_id,
            k,
            top: outcome.top,
            partitions: collected.partitions,
            completeness,
            enrichment_misses,
            colocation_violations: outcome.duplicate_keys,
            phases: tracker.phases(),
            started_at,
            duration: clock.elapsed(),
        };
        info!("Top-k run finished: {}", report.summary());
        Ok(report)
    }

    fn dispatch(
        &self,
        map: &PartitionMap,
        k: usize,
    ) -> (JoinSet<Result<PartialResult, JobError>>, HashMap<Id, JobSlot>) {
        let limiter = self
            .config
            .max_parallel_jobs
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            backoff: self.config.retry_backoff,
        };

        info!(
            "Dispatching {} jobs (max parallel: {})",
            map.len(),
            self.config
                .max_parallel_jobs
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );

        let mut jobs = JoinSet::new();
        let mut slots = HashMap::with_capacity(map.len());
        for assignment in map.iter() {
            let job = AggregationJob::new(assignment.partition, k);
            let node = assignment.node.clone();
            let attempts = Arc::new(AtomicU32::new(0));
            let span = info_span!("partition_job", partition = %job.partition, node = %node);

            let handle = jobs.spawn(
                run_job(
                    self.transport.clone(),
                    node.clone(),
                    job,
                    policy,
                    limiter.clone(),
                    attempts.clone(),
                )
                .instrument(span),
            );
            slots.insert(
                handle.id(),
                JobSlot {
                    partition: assignment.partition,
                    node,
                    attempts,
                    dispatched: Instant::now(),
                },
            );
        }

        (jobs, slots)
    }

    async fn collect(
        &self,
        jobs: &mut JoinSet<Result<PartialResult, JobError>>,
        mut slots: HashMap<Id, JobSlot>,
    ) -> Collected {
        // A timeout past the end of the clock's range means no deadline
        let deadline = tokio::time::Instant::now().checked_add(self.config.fan_in_timeout);
        let mut partials = Vec::with_capacity(slots.len());
        let mut partitions = Vec::with_capacity(slots.len());

        loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, jobs.join_next_with_id()).await,
                None => Ok(jobs.join_next_with_id().await),
            };
            let (id, result) = match next {
                Ok(Some(Ok((id, result)))) => (id, result),
                Ok(Some(Err(join_error))) => {
                    let id = join_error.id();
                    let reason = if join_error.is_panic() {
                        "job panicked".to_string()
                    } else {
                        join_error.to_string()
                    };
                    let node = match slots.get(&id) {
                        Some(slot) => slot.node.clone(),
                        None => continue,
                    };
                    (id, Err(JobError::Transport { node, reason }))
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Fan-in deadline of {:?} passed with {} jobs outstanding",
                        self.config.fan_in_timeout,
                        jobs.len()
                    );
                    jobs.abort_all();
                    break;
                }
            };

            let Some(slot) = slots.remove(&id) else {
                continue;
            };
            match result {
                Ok(partial) => {
                    debug!(
                        "Partition {} returned {} entries",
                        slot.partition,
                        partial.len()
                    );
                    partitions.push(slot.report(PartitionStatus::Completed {
                        entries: partial.len(),
                    }));
                    partials.push(partial);
                }
                Err(e) => {
                    warn!("Partition {} failed: {}", slot.partition, e);
                    partitions.push(slot.report(PartitionStatus::Failed {
                        error: e.to_string(),
                    }));
                }
            }
        }

        // Wait for cancelled jobs to unwind so their cursors are closed
        while jobs.join_next().await.is_some() {}

        for slot in slots.into_values() {
            partitions.push(slot.report(PartitionStatus::TimedOut));
        }
        partitions.sort_by_key(|report| report.partition);

        Collected {
            partials,
            partitions,
        }
    }
}

async fn run_job(
    transport: Arc<dyn JobTransport>,
    node: NodeId,
    job: AggregationJob,
    policy: RetryPolicy,
    limiter: Option<Arc<Semaphore>>,
    attempts: Arc<AtomicU32>,
) -> Result<PartialResult, JobError> {
    let _permit = match limiter {
        Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|_| {
            JobError::Transport {
                node: node.clone(),
                reason: "dispatch limiter closed".to_string(),
            }
        })?),
        None => None,
    };

    loop {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let result = match transport.submit(&node, job).await {
            Ok(bytes) => ResultMarshaler::decode_for(&job, &bytes).map_err(JobError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(partial) => return Ok(partial),
            Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                warn!(
                    "Attempt {} for partition {} failed, retrying: {}",
                    attempt, job.partition, e
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
