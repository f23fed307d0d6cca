use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::step::StepKind;
use crate::visual::VisualDiff;

/// What to do with a checkpoint whose difference exceeds the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffDecision {
    /// Fail the run with a visual regression
    Stop,
    /// Persist the current capture as the new baseline and continue
    Update,
    /// Accept the difference for this run only
    Continue,
}

impl std::str::FromStr for DiffDecision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop" => Ok(DiffDecision::Stop),
            "update" => Ok(DiffDecision::Update),
            "continue" => Ok(DiffDecision::Continue),
            _ => anyhow::bail!("Unknown diff decision '{}', expected stop, update or continue", s),
        }
    }
}

/// The step a visual decision is being asked about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    pub test_name: String,
    pub execution_id: String,
    pub step_index: usize,
    pub kind: StepKind,
    pub selector: Option<String>,
}

/// Adjudicates checkpoints over the threshold
#[async_trait]
pub trait DiffDecider: Send + Sync {
    async fn decide(&self, context: &StepContext, diff: &VisualDiff) -> DiffDecision;
}

/// Always answers with the same decision
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub DiffDecision);

#[async_trait]
impl DiffDecider for FixedDecision {
    async fn decide(&self, _context: &StepContext, _diff: &VisualDiff) -> DiffDecision {
        self.0
    }
}
