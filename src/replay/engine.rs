use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::policy::{DiffDecider, FixedDecision};
use super::report::{
    CheckpointResult, ReplayEvent, ReplayOutcome, ReplayStatus, ReplaySummary, RunOutcome,
    StepFailure,
};
use crate::config::{ReplayConfig, VisualConfig};
use crate::errors::ReplayError;
use crate::execution::{ExecutionState, ExecutionStateStore, SessionRegistry};
use crate::page::Page;
use crate::selector::Resolver;
use crate::step::StepSequence;
use crate::store::{Settings, Store};
use crate::types::now_millis;

/// What a single step asked the loop to do next
pub(super) enum StepFlow {
    Next,
    /// Persist progress and hand the page over to this URL
    Navigate(String),
}

/// Drives a page through a step sequence, one run per tab at a time
pub struct ReplayEngine<P: Page> {
    pub(super) page: Arc<P>,
    pub(super) store: Arc<dyn Store>,
    pub(super) states: ExecutionStateStore,
    pub(super) registry: Arc<SessionRegistry>,
    pub(super) resolver: Resolver,
    pub(super) visual: VisualConfig,
    pub(super) config: ReplayConfig,
    pub(super) decider: Arc<dyn DiffDecider>,
    events: Option<UnboundedSender<ReplayEvent>>,
}

impl<P: Page> ReplayEngine<P> {
    pub fn new(page: Arc<P>, store: Arc<dyn Store>, registry: Arc<SessionRegistry>) -> Self {
        let visual = VisualConfig::default();
        Self {
            page,
            states: ExecutionStateStore::new(Arc::clone(&store)),
            store,
            registry,
            resolver: Resolver::default(),
            decider: Arc::new(FixedDecision(visual.on_diff)),
            visual,
            config: ReplayConfig::default(),
            events: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Also resets the decider to the config's `on_diff`
    pub fn with_visual_config(mut self, visual: VisualConfig) -> Self {
        self.decider = Arc::new(FixedDecision(visual.on_diff));
        self.visual = visual;
        self
    }

    pub fn with_replay_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn DiffDecider>) -> Self {
        self.decider = decider;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<ReplayEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn states(&self) -> &ExecutionStateStore {
        &self.states
    }

    /// Start a run of `test` in `tab_id`.
    ///
    /// Rejected with [`ReplayError::AlreadyRunning`] while another run holds
    /// the tab; the other run's state is left untouched.
    pub async fn replay_test(
        &self,
        test: StepSequence,
        tab_id: &str,
        execution_id: &str,
    ) -> Result<ReplayOutcome, ReplayError> {
        let fresh_claim = self.registry.active_execution(tab_id).is_none();
        self.registry.try_begin(tab_id, execution_id)?;

        let existing = match self.states.get(tab_id) {
            Ok(existing) => existing,
            Err(e) => {
                self.release_claim(tab_id, execution_id, fresh_claim);
                return Err(e.into());
            }
        };
        if let Some(existing) = existing {
            self.release_claim(tab_id, execution_id, fresh_claim);
            warn!(
                "Tab '{}' already has execution {} at step {}",
                tab_id, existing.execution_id, existing.current_step_index
            );
            return Err(ReplayError::AlreadyRunning(tab_id.to_string()));
        }

        let state = ExecutionState {
            test_data: test,
            current_step_index: 0,
            start_time: now_millis(),
            tab_id: tab_id.to_string(),
            execution_id: execution_id.to_string(),
        };
        if let Err(e) = self.states.persist(&state).await {
            self.release_claim(tab_id, execution_id, fresh_claim);
            return Err(e.into());
        }

        info!(
            "Replaying '{}' ({} steps) in tab '{}' as {}",
            state.test_data.name,
            state.test_data.len(),
            tab_id,
            execution_id
        );
        Ok(self.run(state).await)
    }

    /// Continue a run from the state persisted before a navigation
    pub async fn resume_test(&self, state: ExecutionState) -> Result<ReplayOutcome, ReplayError> {
        let tab_id = state.tab_id.clone();
        let execution_id = state.execution_id.clone();

        let fresh_claim = self.registry.active_execution(&tab_id).is_none();
        self.registry.try_begin(&tab_id, &execution_id)?;

        match self.states.get(&tab_id) {
            Ok(Some(persisted)) if persisted.execution_id != execution_id => {
                self.release_claim(&tab_id, &execution_id, fresh_claim);
                return Err(ReplayError::AlreadyRunning(tab_id));
            }
            Ok(_) => {}
            Err(e) => {
                self.release_claim(&tab_id, &execution_id, fresh_claim);
                return Err(e.into());
            }
        }

        info!(
            "Resuming '{}' in tab '{}' at step {}",
            state.test_data.name,
            tab_id,
            state.current_step_index + 1
        );
        Ok(self.run(state).await)
    }

    fn release_claim(&self, tab_id: &str, execution_id: &str, fresh_claim: bool) {
        if fresh_claim {
            self.registry.end(tab_id, execution_id);
        }
    }

    async fn run(&self, mut state: ExecutionState) -> ReplayOutcome {
        let mut checkpoints = Vec::new();
        let replay_delay = match Settings::load(&*self.store) {
            Ok(settings) => Duration::from_millis(settings.replay_delay),
            Err(e) => {
                warn!("Using default settings: {}", e);
                Duration::from_millis(Settings::default().replay_delay)
            }
        };

        let total = state.test_data.steps.len();
        self.registry.mark_progress(&state.tab_id);

        while state.current_step_index < total {
            let index = state.current_step_index;

            if self.registry.is_stop_requested(&state.execution_id) {
                info!("Execution {} interrupted before step {}", state.execution_id, index + 1);
                return self.finish(state, ReplayStatus::Interrupted, None, checkpoints);
            }

            self.registry.mark_progress(&state.tab_id);
            let kind = state.test_data.steps[index].kind();
            self.emit(ReplayEvent::Progress {
                execution_id: state.execution_id.clone(),
                step_index: index,
                total_steps: total,
                kind,
            });

            tokio::time::sleep(replay_delay).await;
            debug!("Step {}/{}: {}", index + 1, total, kind);

            match self.execute_step(&mut state, index, &mut checkpoints).await {
                Ok(StepFlow::Next) => {}
                Ok(StepFlow::Navigate(url)) => {
                    state.current_step_index = index + 1;
                    if let Err(e) = self.states.persist(&state).await {
                        return self.fail(state, index, e.into(), checkpoints);
                    }
                    info!("Navigating to {}; run continues on the next page", url);
                    if let Err(e) = self.page.navigate(&url).await {
                        let err = ReplayError::ActionDispatch {
                            action: kind.to_string(),
                            selector: url,
                            message: e.to_string(),
                        };
                        return self.fail(state, index, err, checkpoints);
                    }
                    return ReplayOutcome {
                        outcome: RunOutcome::NavigationPending(state),
                        checkpoints,
                    };
                }
                Err(err) => return self.fail(state, index, err, checkpoints),
            }

            // Saved before the next step so a navigation it triggers resumes past it
            state.current_step_index = index + 1;
            if let Err(e) = self.states.persist(&state).await {
                return self.fail(state, index, e.into(), checkpoints);
            }
        }

        self.finish(state, ReplayStatus::Completed, None, checkpoints)
    }

    fn fail(
        &self,
        state: ExecutionState,
        index: usize,
        err: ReplayError,
        checkpoints: Vec<CheckpointResult>,
    ) -> ReplayOutcome {
        let step = &state.test_data.steps[index];
        let failure = StepFailure::new(index, step.kind(), step.selector().map(str::to_string), &err);
        error!("{}", failure);
        self.finish(state, ReplayStatus::Failed, Some(failure), checkpoints)
    }

    /// Clear the tab, release it and report; every terminal path goes through here
    fn finish(
        &self,
        state: ExecutionState,
        status: ReplayStatus,
        failure: Option<StepFailure>,
        checkpoints: Vec<CheckpointResult>,
    ) -> ReplayOutcome {
        // Only clear our own state; a reset may have let another run in
        match self.states.get(&state.tab_id) {
            Ok(Some(persisted)) if persisted.execution_id == state.execution_id => {
                if let Err(e) = self.states.clear(&state.tab_id) {
                    warn!("Failed to clear execution state for '{}': {}", state.tab_id, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read execution state for '{}': {}", state.tab_id, e),
        }
        self.registry.end(&state.tab_id, &state.execution_id);

        let summary = ReplaySummary {
            test_name: state.test_data.name.clone(),
            execution_id: state.execution_id.clone(),
            status,
            passed: status == ReplayStatus::Completed,
            total_steps: state.test_data.steps.len(),
            executed_steps: state.current_step_index,
            duration_ms: now_millis().saturating_sub(state.start_time),
            error: failure.as_ref().map(|f| f.to_string()),
        };
        info!("{}", summary);

        let execution_id = state.execution_id.clone();
        let outcome = match (status, failure) {
            (ReplayStatus::Failed, Some(failure)) => {
                self.emit(ReplayEvent::Failed {
                    execution_id,
                    summary: summary.clone(),
                    failure: failure.clone(),
                });
                RunOutcome::Failed(summary, failure)
            }
            (ReplayStatus::Interrupted, _) => {
                self.emit(ReplayEvent::Interrupted {
                    execution_id,
                    summary: summary.clone(),
                });
                RunOutcome::Interrupted(summary)
            }
            _ => {
                self.emit(ReplayEvent::Completed {
                    execution_id,
                    summary: summary.clone(),
                });
                RunOutcome::Completed(summary)
            }
        };

        ReplayOutcome {
            outcome,
            checkpoints,
        }
    }

    pub(crate) fn emit(&self, event: ReplayEvent) {
        if let Some(events) = &self.events
            && events.send(event).is_err()
        {
            debug!("Replay event receiver dropped");
        }
    }
}
