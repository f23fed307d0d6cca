//! Replay engine
//!
//! A run moves `Idle -> Running -> {Completed | Failed | Interrupted}`. Steps
//! execute strictly in order; progress is persisted after each one so a
//! navigation can end the call with [`RunOutcome::NavigationPending`] and a
//! later [`ReplayEngine::resume_test`] picks up at the next index. Every
//! terminal path clears the tab's execution state and reports one summary.

mod engine;
mod executor;
pub mod policy;
pub mod report;

pub use engine::ReplayEngine;
pub use policy::{DiffDecider, DiffDecision, FixedDecision, StepContext};
pub use report::{
    CheckpointResult, ReplayEvent, ReplayOutcome, ReplayStatus, ReplaySummary, RunOutcome,
    StepFailure,
};

#[cfg(test)]
#[path = "replay_test.rs"]
mod replay_test;
