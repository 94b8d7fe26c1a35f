//! Distributed top-K over partitioned fact rows
//!
//! A run resolves partition ownership, ships one [`AggregationJob`] per
//! partition to its owner, and reduces the returned partial rankings into a
//! [`GlobalTopK`] that is then enriched with entity attributes.
//!
//! ```text
//! PartitionLocator ──> Orchestrator ──(JobTransport)──> LocalAggregator
//!                           │                                 │
//!                           │ <──── ResultMarshaler bytes ────┘
//!                           v
//!                      ReduceMerger ──> Enricher ──> TopKReport
//! ```

pub mod aggregator;
pub mod enricher;
pub mod errors;
pub mod formatter;
pub mod locator;
pub mod marshal;
pub mod merger;
pub mod orchestrator;
pub mod report;
pub mod state_machine;
pub mod transport;
pub mod types;

pub use aggregator::{Accumulator, LocalAggregator};
pub use enricher::{Enricher, UNKNOWN_LABEL};
pub use errors::{EnrichmentMiss, JobError, MarshalError, TopKError, TopKResult};
pub use formatter::{FormatType, ReportFormatter};
pub use locator::{PartitionAssignment, PartitionLocator, PartitionMap};
pub use marshal::ResultMarshaler;
pub use merger::{MergeOutcome, ReduceMerger};
pub use orchestrator::Orchestrator;
pub use report::{Completeness, PartitionReport, PartitionStatus, TopKReport};
pub use state_machine::{apply_transition, RunPhase, RunTracker, RunTransition, StateError};
pub use transport::{JobTransport, LocalTransport};
pub use types::{
    is_ranked, rank_descending, AggregationJob, GlobalTopK, KeyTotal, PartialResult, RankKey,
    RankedEntry,
};
