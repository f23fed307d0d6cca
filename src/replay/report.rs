use serde::{Deserialize, Serialize};
use std::fmt;

use super::policy::DiffDecision;
use crate::errors::ReplayError;
use crate::execution::ExecutionState;
use crate::step::StepKind;
use crate::types::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplayStatus::Idle => "idle",
            ReplayStatus::Running => "running",
            ReplayStatus::Completed => "completed",
            ReplayStatus::Failed => "failed",
            ReplayStatus::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Where and why a run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    /// Zero-based index into the test's steps
    pub step_index: usize,
    pub kind: StepKind,
    pub selector: Option<String>,
    /// Error kind, e.g. `ElementNotFoundError`
    pub error: String,
    pub message: String,
    pub exit_code: i32,
}

impl StepFailure {
    pub fn new(step_index: usize, kind: StepKind, selector: Option<String>, error: &ReplayError) -> Self {
        Self {
            step_index,
            kind,
            selector,
            error: error.kind().to_string(),
            message: error.to_string(),
            exit_code: error.exit_code(),
        }
    }

    /// One-based step number, as shown to users
    pub fn step_number(&self) -> usize {
        self.step_index + 1
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {} ({}", self.step_number(), self.kind)?;
        if let Some(selector) = &self.selector {
            write!(f, " {}", selector)?;
        }
        write!(f, ") failed: {}", self.message)
    }
}

/// Terminal report, produced exactly once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub test_name: String,
    pub execution_id: String,
    pub status: ReplayStatus,
    pub passed: bool,
    pub total_steps: usize,
    /// Steps that ran to completion, across navigations
    pub executed_steps: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.status {
            ReplayStatus::Completed => "PASS",
            ReplayStatus::Interrupted => "STOPPED",
            _ => "FAIL",
        };
        write!(
            f,
            "{} {}: {}/{} steps in {:.1}s",
            verdict,
            self.test_name,
            self.executed_steps,
            self.total_steps,
            self.duration_ms as f64 / 1000.0
        )?;
        if let Some(error) = &self.error {
            write!(f, " - {}", error)?;
        }
        Ok(())
    }
}

/// A visual checkpoint as it was evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResult {
    pub step_index: usize,
    /// `None` when no comparison was possible
    pub difference_percentage: Option<f64>,
    /// Set only when the threshold was exceeded
    pub decision: Option<DiffDecision>,
}

/// How a call into the engine ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(ReplaySummary),
    Failed(ReplaySummary, StepFailure),
    Interrupted(ReplaySummary),
    /// The page is navigating; resume with this state once it has loaded
    NavigationPending(ExecutionState),
}

impl RunOutcome {
    pub fn status(&self) -> ReplayStatus {
        match self {
            RunOutcome::Completed(_) => ReplayStatus::Completed,
            RunOutcome::Failed(..) => ReplayStatus::Failed,
            RunOutcome::Interrupted(_) => ReplayStatus::Interrupted,
            RunOutcome::NavigationPending(_) => ReplayStatus::Running,
        }
    }

    pub fn summary(&self) -> Option<&ReplaySummary> {
        match self {
            RunOutcome::Completed(s) | RunOutcome::Failed(s, _) | RunOutcome::Interrupted(s) => Some(s),
            RunOutcome::NavigationPending(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            RunOutcome::Failed(_, failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result of one engine call plus the checkpoints it evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub outcome: RunOutcome,
    pub checkpoints: Vec<CheckpointResult>,
}

/// Notifications about a run, tagged with its execution id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReplayEvent {
    #[serde(rename = "testProgress", rename_all = "camelCase")]
    Progress {
        execution_id: String,
        step_index: usize,
        total_steps: usize,
        kind: StepKind,
    },
    #[serde(rename = "testCompleted", rename_all = "camelCase")]
    Completed {
        execution_id: String,
        summary: ReplaySummary,
    },
    #[serde(rename = "testFailed", rename_all = "camelCase")]
    Failed {
        execution_id: String,
        summary: ReplaySummary,
        failure: StepFailure,
    },
    #[serde(rename = "testInterrupted", rename_all = "camelCase")]
    Interrupted {
        execution_id: String,
        summary: ReplaySummary,
    },
}

impl ReplayEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ReplayEvent::Progress { execution_id, .. }
            | ReplayEvent::Completed { execution_id, .. }
            | ReplayEvent::Failed { execution_id, .. }
            | ReplayEvent::Interrupted { execution_id, .. } => execution_id,
        }
    }

    /// Terminal failure for a run the engine refused to start or continue
    pub fn rejected(state: &ExecutionState, error: &ReplayError) -> Self {
        let steps = &state.test_data.steps;
        let step = steps.get(state.current_step_index).or(steps.last());
        // Nothing ran yet, so the failure belongs to loading the start URL
        let kind = step.map_or(StepKind::Navigation, |s| s.kind());
        let selector = step.and_then(|s| s.selector()).map(str::to_string);
        let failure = StepFailure::new(state.current_step_index, kind, selector, error);

        let summary = ReplaySummary {
            test_name: state.test_data.name.clone(),
            execution_id: state.execution_id.clone(),
            status: ReplayStatus::Failed,
            passed: false,
            total_steps: steps.len(),
            executed_steps: state.current_step_index,
            duration_ms: now_millis().saturating_sub(state.start_time),
            error: Some(failure.to_string()),
        };

        ReplayEvent::Failed {
            execution_id: state.execution_id.clone(),
            summary,
            failure,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReplayEvent::Progress { .. })
    }
}
