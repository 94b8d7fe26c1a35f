//! Pure run lifecycle state machine
//!
//! ## State Machine Diagram
//!
//! ```text
//! ┌──────┐ Resolve ┌────────────────────┐ Dispatch ┌────────────────┐
//! │ Idle │ ──────> │ PartitionsResolved │ ───────> │ JobsDispatched │
//! └──────┘         └────────────────────┘          └───────┬────────┘
//!                                                          │ Collect
//!                                                          v
//! ┌──────┐ Finish  ┌──────────┐  Enrich  ┌────────┐ Merge ┌───────────────────┐
//! │ Done │ <────── │ Enriched │ <─────── │ Merged │ <──── │ PartialsCollected │
//! └──────┘         └──────────┘          └────────┘       └───────────────────┘
//! ```
//!
//! `Fail` moves any non-terminal state to `Failed`. `Done` and `Failed` are
//! terminal; the machine has no cycles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Phase of a top-K run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    PartitionsResolved,
    JobsDispatched,
    PartialsCollected,
    Merged,
    Enriched,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::PartitionsResolved => "PartitionsResolved",
            Self::JobsDispatched => "JobsDispatched",
            Self::PartialsCollected => "PartialsCollected",
            Self::Merged => "Merged",
            Self::Enriched => "Enriched",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Event moving a run between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTransition {
    Resolve,
    Dispatch,
    Collect,
    Merge,
    Enrich,
    Finish,
    Fail,
}

/// Error type for state transitions
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid transition from {from} with {transition:?}")]
    InvalidTransition {
        from: RunPhase,
        transition: RunTransition,
    },
}

/// Apply a transition to the current phase
pub fn apply_transition(
    phase: RunPhase,
    transition: RunTransition,
) -> Result<RunPhase, StateError> {
    use RunPhase::*;
    use RunTransition::*;

    match (phase, transition) {
        (Idle, Resolve) => Ok(PartitionsResolved),
        (PartitionsResolved, Dispatch) => Ok(JobsDispatched),
        (JobsDispatched, Collect) => Ok(PartialsCollected),
        (PartialsCollected, Merge) => Ok(Merged),
        (Merged, Enrich) => Ok(Enriched),
        (Enriched, Finish) => Ok(Done),
        (from, Fail) if !from.is_terminal() => Ok(Failed),
        (from, transition) => Err(StateError::InvalidTransition { from, transition }),
    }
}

/// Tracks the phase of one run and when each phase was entered
#[derive(Debug, Clone)]
pub struct RunTracker {
    phase: RunPhase,
    history: Vec<(RunPhase, Instant)>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            history: vec![(RunPhase::Idle, Instant::now())],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Apply a transition, recording the new phase
    pub fn advance(&mut self, transition: RunTransition) -> Result<RunPhase, StateError> {
        let next = apply_transition(self.phase, transition)?;
        tracing::debug!("Run phase {} -> {}", self.phase, next);
        self.phase = next;
        self.history.push((next, Instant::now()));
        Ok(next)
    }

    /// Phases visited so far, in order
    pub fn phases(&self) -> Vec<RunPhase> {
        self.history.iter().map(|(phase, _)| *phase).collect()
    }
}
