//! Per-step dispatch for the replay loop

use tracing::{debug, info, warn};

use super::engine::{ReplayEngine, StepFlow};
use super::policy::{DiffDecision, StepContext};
use super::report::CheckpointResult;
use crate::errors::ReplayError;
use crate::execution::ExecutionState;
use crate::page::{Interaction, Page, same_url};
use crate::recorder::capture_clean;
use crate::step::{Action, Step};
use crate::store::TestLibrary;
use crate::types::ScrollPosition;
use crate::visual;

/// Native interaction that replays an element action
fn interaction_for(action: &Action) -> Option<Interaction> {
    match action {
        Action::Click { .. } => Some(Interaction::Click),
        Action::Input { value, .. } => Some(Interaction::Input {
            value: value.clone(),
        }),
        Action::Change { value, checked, .. } => Some(Interaction::Change {
            value: value.clone(),
            checked: *checked,
        }),
        Action::Keypress { key, .. } => Some(Interaction::Keypress { key: key.clone() }),
        Action::Navigation { .. } | Action::Screenshot => None,
    }
}

impl<P: Page> ReplayEngine<P> {
    pub(super) async fn execute_step(
        &self,
        state: &mut ExecutionState,
        index: usize,
        checkpoints: &mut Vec<CheckpointResult>,
    ) -> Result<StepFlow, ReplayError> {
        let step = state.test_data.steps[index].clone();

        match &step.action {
            Action::Navigation { url } => {
                let current = self.page.current_url().await?;
                if same_url(&current, url) {
                    debug!("Already at {}, navigation step is a checkpoint", url);
                    Ok(StepFlow::Next)
                } else {
                    Ok(StepFlow::Navigate(url.clone()))
                }
            }
            Action::Screenshot => {
                self.screenshot_step(state, index, &step, checkpoints).await?;
                Ok(StepFlow::Next)
            }
            _ => {
                self.element_step(state, index, &step, checkpoints).await?;
                Ok(StepFlow::Next)
            }
        }
    }

    async fn element_step(
        &self,
        state: &mut ExecutionState,
        index: usize,
        step: &Step,
        checkpoints: &mut Vec<CheckpointResult>,
    ) -> Result<(), ReplayError> {
        let Some(interaction) = interaction_for(&step.action) else {
            return Ok(());
        };
        let selector = step.selector().unwrap_or_default();
        let kind = step.kind();
        let dispatch_error = |e: anyhow::Error| ReplayError::ActionDispatch {
            action: kind.to_string(),
            selector: selector.to_string(),
            message: e.to_string(),
        };

        let element = self
            .resolver
            .resolve(&*self.page, selector, step.action.expected_text())
            .await?;

        self.page
            .scroll_into_view(&element)
            .await
            .map_err(dispatch_error)?;
        self.wait_scroll_settle().await;

        self.page
            .dispatch(&element, &interaction)
            .await
            .map_err(dispatch_error)?;

        if step.screenshot.is_some() {
            if let Some(scroll) = step.scroll_position {
                self.restore_scroll(scroll).await;
            }
            let current = match self.capture_element(&element).await {
                Ok(png) => Some(png),
                Err(e) => {
                    warn!("Element capture for step {} failed: {}", index + 1, e);
                    None
                }
            };
            self.check_visual(state, index, current, checkpoints).await?;
        }

        Ok(())
    }

    async fn screenshot_step(
        &self,
        state: &mut ExecutionState,
        index: usize,
        step: &Step,
        checkpoints: &mut Vec<CheckpointResult>,
    ) -> Result<(), ReplayError> {
        if step.screenshot.is_none() {
            debug!("Screenshot step {} has no baseline", index + 1);
            return Ok(());
        }

        if let Some(scroll) = step.scroll_position {
            self.restore_scroll(scroll).await;
        }

        let current = match capture_clean(&*self.page).await {
            Ok(png) => Some(png),
            Err(e) => {
                warn!("Viewport capture for step {} failed: {}", index + 1, e);
                None
            }
        };
        self.check_visual(state, index, current, checkpoints).await
    }

    async fn capture_element(&self, element: &P::Element) -> anyhow::Result<Vec<u8>> {
        let viewport = capture_clean(&*self.page).await?;
        let rect = self.page.element_rect(element).await?;
        let ratio = self.page.device_pixel_ratio().await?;
        Ok(visual::crop(&viewport, &rect, ratio)?)
    }

    /// Poll the scroll offset until two consecutive reads agree
    async fn wait_scroll_settle(&self) {
        let mut last: Option<ScrollPosition> = None;
        for _ in 0..self.config.scroll_max_polls.max(2) {
            match self.page.scroll_position().await {
                Ok(position) => {
                    if last == Some(position) {
                        return;
                    }
                    last = Some(position);
                }
                Err(e) => {
                    debug!("Scroll position unavailable: {}", e);
                    return;
                }
            }
            tokio::time::sleep(self.config.scroll_poll()).await;
        }
        debug!("Scroll did not settle, continuing");
    }

    async fn restore_scroll(&self, position: ScrollPosition) {
        if let Err(e) = self.page.scroll_to(position).await {
            warn!("Failed to restore scroll offset: {}", e);
            return;
        }
        self.wait_scroll_settle().await;
    }

    /// Compare against the step's baseline and apply the visual-difference policy.
    ///
    /// Anything that prevents a comparison is logged and passes.
    async fn check_visual(
        &self,
        state: &mut ExecutionState,
        index: usize,
        current: Option<Vec<u8>>,
        checkpoints: &mut Vec<CheckpointResult>,
    ) -> Result<(), ReplayError> {
        let step = &state.test_data.steps[index];
        let Some(baseline_url) = step.screenshot.as_deref() else {
            return Ok(());
        };
        let no_diff = CheckpointResult {
            step_index: index,
            difference_percentage: None,
            decision: None,
        };

        let Some(current) = current else {
            checkpoints.push(no_diff);
            return Ok(());
        };

        let baseline = match visual::decode_data_url(baseline_url) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Baseline for step {} is unreadable: {}", index + 1, e);
                checkpoints.push(no_diff);
                return Ok(());
            }
        };

        let diff = match visual::compare(&baseline, &current, &self.visual).await {
            Ok(diff) => diff,
            Err(e) => {
                warn!("No visual diff for step {}: {}", index + 1, e);
                checkpoints.push(no_diff);
                return Ok(());
            }
        };

        let percentage = diff.difference_percentage;
        if !diff.exceeds(self.visual.threshold) {
            debug!("Step {} matches its baseline ({:.2}%)", index + 1, percentage);
            checkpoints.push(CheckpointResult {
                step_index: index,
                difference_percentage: Some(percentage),
                decision: None,
            });
            return Ok(());
        }

        let context = StepContext {
            test_name: state.test_data.name.clone(),
            execution_id: state.execution_id.clone(),
            step_index: index,
            kind: step.kind(),
            selector: step.selector().map(str::to_string),
        };
        let decision = self.decider.decide(&context, &diff).await;
        checkpoints.push(CheckpointResult {
            step_index: index,
            difference_percentage: Some(percentage),
            decision: Some(decision),
        });

        match decision {
            DiffDecision::Stop => Err(ReplayError::VisualRegression {
                step_index: index,
                difference_percentage: percentage,
            }),
            DiffDecision::Update => {
                let name = state.test_data.name.clone();
                match TestLibrary::new(&*self.store).update_baseline(&name, index, diff.current.clone()) {
                    Ok(()) => info!("Accepted new baseline for '{}' step {}", name, index + 1),
                    Err(e) => warn!("Could not persist new baseline for '{}': {}", name, e),
                }
                state.test_data.steps[index].screenshot = Some(diff.current);
                Ok(())
            }
            DiffDecision::Continue => {
                info!(
                    "Accepting {:.2}% difference at step {} for this run",
                    percentage,
                    index + 1
                );
                Ok(())
            }
        }
    }
}
