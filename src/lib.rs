//! # shard-topk
//!
//! Top-K ranking of entities by summed amount across a partitioned data set,
//! computed scatter/gather style: each partition aggregates its own rows
//! locally and only its best `k` entries travel back to be merged.
//!
//! ## Usage
//!
//! ```bash
//! shard-topk run --invoice-lines lines.csv --customers customers.csv [-k 5] [--partitions 4]
//! ```
//!
//! ## Modules
//!
//! - `config` - Run configuration from TOML files and environment variables
//! - `mapreduce` - Partition jobs, partial result merging, and run orchestration
//! - `storage` - Storage seams and the in-memory partitioned cluster
//! - `testing` - Fault-injecting collaborators for exercising degraded runs
pub mod config;
pub mod error;
pub mod mapreduce;
pub mod storage;

pub mod testing;

pub use error::{Error, Result};
pub use mapreduce::{GlobalTopK, Orchestrator, RankedEntry, TopKReport};
