//! Outcome of a top-K run
//!
//! A run that returns a report always carries a valid ranking. Whether that
//! ranking covers every partition is stated by [`Completeness`]; a degraded
//! run lists the partitions left out and why.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::errors::EnrichmentMiss;
use super::state_machine::RunPhase;
use super::types::GlobalTopK;
use crate::storage::{EntityKey, NodeId, PartitionId};

/// How a single partition job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Partial result collected with this many entries
    Completed { entries: usize },
    /// Job failed after all attempts
    Failed { error: String },
    /// Job still outstanding when the fan-in deadline passed
    TimedOut,
}

impl PartitionStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Per-partition line of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub partition: PartitionId,
    pub node: NodeId,
    #[serde(flatten)]
    pub status: PartitionStatus,
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Coverage of the ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Degraded {
        failed: Vec<PartitionId>,
        timed_out: Vec<PartitionId>,
    },
}

impl Completeness {
    /// Derive coverage from per-partition outcomes
    pub fn from_partitions(partitions: &[PartitionReport]) -> Self {
        let mut failed = Vec::new();
        let mut timed_out = Vec::new();
        for report in partitions {
            match report.status {
                PartitionStatus::Completed { .. } => {}
                PartitionStatus::Failed { .. } => failed.push(report.partition),
                PartitionStatus::TimedOut => timed_out.push(report.partition),
            }
        }

        if failed.is_empty() && timed_out.is_empty() {
            Self::Complete
        } else {
            failed.sort();
            timed_out.sort();
            Self::Degraded { failed, timed_out }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Partitions whose data is missing from the ranking
    pub fn missing(&self) -> Vec<PartitionId> {
        match self {
            Self::Complete => Vec::new(),
            Self::Degraded { failed, timed_out } => {
                let mut missing: Vec<PartitionId> =
                    failed.iter().chain(timed_out).copied().collect();
                missing.sort();
                missing
            }
        }
    }
}

/// Ranking plus everything known about how it was produced
#[derive(Debug, Clone, Serialize)]
pub struct TopKReport {
    pub run_id: Uuid,
    pub k: usize,
    pub top: GlobalTopK,
    pub partitions: Vec<PartitionReport>,
    pub completeness: Completeness,
    pub enrichment_misses: Vec<EnrichmentMiss>,
    /// Entity keys found in more than one partition
    pub colocation_violations: Vec<EntityKey>,
    pub phases: Vec<RunPhase>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl TopKReport {
    /// True when every partition contributed and colocation held
    pub fn is_complete(&self) -> bool {
        self.completeness.is_complete() && self.colocation_violations.is_empty()
    }

    pub fn partitions_completed(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.status.is_completed())
            .count()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} entries from {}/{} partitions in {}ms",
            self.top.len(),
            self.k,
            self.partitions_completed(),
            self.partitions.len(),
            self.duration.as_millis()
        );
        if !self.completeness.is_complete() {
            summary.push_str(" (degraded)");
        }
        if !self.enrichment_misses.is_empty() {
            summary.push_str(&format!(
                ", {} unenriched",
                self.enrichment_misses.len()
            ));
        }
        if !self.colocation_violations.is_empty() {
            summary.push_str(&format!(
                ", {} keys span partitions",
                self.colocation_violations.len()
            ));
        }
        summary
    }
}
