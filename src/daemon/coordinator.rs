//! The privileged side of the transport: owns the tabs, the store, the
//! recording sessions and every replay the daemon has started.
//!
//! Replays are fire-and-forget. Their notifications are buffered per execution
//! id until a client drains them. The coordinator also plays the navigation
//! listener: when a run suspends for a page load it waits for the page and
//! resumes the run from the persisted execution state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::ReplayError;
use crate::execution::{self, ExecutionState, ExecutionStateStore, SessionRegistry};
use crate::page::{Page, same_url};
use crate::recorder::{Recorder, RecordingSession, capture_clean};
use crate::replay::{ReplayEngine, ReplayEvent, ReplayOutcome, RunOutcome};
use crate::selector::Resolver;
use crate::step::{Step, StepSequence};
use crate::store::{Settings, Store, TestLibrary};
use crate::tab_manager::{PageLauncher, TabInfo, TabManager};
use crate::types::now_millis;
use crate::visual;

/// Test listing entry, without the step payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    pub name: String,
    pub start_url: String,
    pub steps: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&StepSequence> for TestInfo {
    fn from(test: &StepSequence) -> Self {
        Self {
            name: test.name.clone(),
            start_url: test.start_url.clone(),
            steps: test.len(),
            created_at: test.created_at,
        }
    }
}

enum RunStart {
    Fresh {
        test: StepSequence,
        tab_id: String,
        execution_id: String,
    },
    Resume(ExecutionState),
}

/// A recording behind its own lock; `None` once it has been stopped
type SharedSession<P> = Arc<Mutex<Option<RecordingSession<P>>>>;

pub struct Coordinator<P: Page + 'static> {
    store: Arc<dyn Store>,
    config: Config,
    registry: Arc<SessionRegistry>,
    states: ExecutionStateStore,
    tabs: TabManager<P>,
    recordings: Mutex<HashMap<String, SharedSession<P>>>,
    events: Arc<DashMap<String, Vec<ReplayEvent>>>,
}

impl<P: Page + 'static> Coordinator<P> {
    pub fn new(store: Arc<dyn Store>, config: Config, launcher: Arc<dyn PageLauncher<P>>) -> Self {
        Self {
            states: ExecutionStateStore::new(Arc::clone(&store)),
            store,
            config,
            registry: Arc::new(SessionRegistry::new()),
            tabs: TabManager::new(launcher),
            recordings: Mutex::new(HashMap::new()),
            events: Arc::new(DashMap::new()),
        }
    }

    pub fn tabs(&self) -> &TabManager<P> {
        &self.tabs
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn start_recording(
        &self,
        test_name: &str,
        tab_id: &str,
        url: Option<&str>,
    ) -> Result<()> {
        let mut recordings = self.recordings.lock().await;
        if recordings.contains_key(tab_id) {
            anyhow::bail!("Tab '{}' is already recording", tab_id);
        }
        if self.registry.active_execution(tab_id).is_some() {
            return Err(ReplayError::AlreadyRunning(tab_id.to_string()).into());
        }

        let page = self.tabs.get_or_create_tab(tab_id).await?;
        if let Some(url) = url {
            page.navigate(url).await?;
        }

        let session = Recorder::new(page, Arc::clone(&self.store))
            .with_selector_config(self.config.selector.clone())
            .start(test_name)
            .await?;
        recordings.insert(tab_id.to_string(), Arc::new(Mutex::new(Some(session))));
        Ok(())
    }

    pub async fn stop_recording(&self, tab_id: &str) -> Result<StepSequence> {
        let shared = self
            .recordings
            .lock()
            .await
            .remove(tab_id)
            .with_context(|| format!("No recording in progress in tab '{}'", tab_id))?;
        // Waits for a poll in flight on this session
        let session = shared
            .lock()
            .await
            .take()
            .with_context(|| format!("Recording in tab '{}' was already stopped", tab_id))?;
        session.stop().await
    }

    /// Add an out-of-band screenshot step to the tab's recording
    pub async fn capture_screenshot(&self, tab_id: &str) -> Result<Step> {
        let shared = self.recording(tab_id).await?;
        let mut session = shared.lock().await;
        match session.as_mut() {
            Some(session) => session.capture_screenshot().await,
            None => anyhow::bail!("Recording in tab '{}' was already stopped", tab_id),
        }
    }

    async fn recording(&self, tab_id: &str) -> Result<SharedSession<P>> {
        self.recordings
            .lock()
            .await
            .get(tab_id)
            .cloned()
            .with_context(|| format!("No recording in progress in tab '{}'", tab_id))
    }

    /// Drain captured events of every active recording.
    ///
    /// Only the session's own lock is held while it polls; the map is not.
    pub async fn poll_recordings(&self) {
        let sessions: Vec<(String, SharedSession<P>)> = self
            .recordings
            .lock()
            .await
            .iter()
            .map(|(tab_id, session)| (tab_id.clone(), Arc::clone(session)))
            .collect();

        for (tab_id, shared) in sessions {
            let mut guard = shared.lock().await;
            let Some(session) = guard.as_mut() else {
                continue;
            };
            match session.poll().await {
                Ok(steps) if !steps.is_empty() => {
                    debug!("Tab '{}' recorded {} steps", tab_id, steps.len())
                }
                Ok(_) => {}
                Err(e) => warn!("Recording poll failed in tab '{}': {}", tab_id, e),
            }
        }
    }

    /// Viewport capture as a data URL, recorder overlays hidden
    pub async fn capture_full_page(&self, tab_id: &str) -> Result<String> {
        let page = self
            .tabs
            .get_tab(tab_id)
            .await
            .with_context(|| format!("Tab '{}' not found", tab_id))?;
        let png = capture_clean(&*page).await?;
        Ok(visual::encode_data_url(&png))
    }

    /// Start replaying a saved test; returns the execution id immediately
    pub async fn replay_test(
        self: &Arc<Self>,
        test_name: &str,
        tab_id: &str,
        execution_id: Option<String>,
    ) -> Result<String> {
        let test = TestLibrary::new(&*self.store)
            .get(test_name)?
            .with_context(|| format!("Test '{}' not found", test_name))?;
        let execution_id = execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.recordings.lock().await.contains_key(tab_id) {
            anyhow::bail!("Tab '{}' is recording; stop the recording first", tab_id);
        }
        let page = self.tabs.get_or_create_tab(tab_id).await?;

        // Claimed before spawning so a concurrent request is rejected here
        if self.registry.active_execution(tab_id).is_some() {
            return Err(ReplayError::AlreadyRunning(tab_id.to_string()).into());
        }
        self.registry.try_begin(tab_id, &execution_id)?;
        match self.states.get(tab_id) {
            Ok(None) => {}
            Ok(Some(_)) => {
                self.registry.end(tab_id, &execution_id);
                return Err(ReplayError::AlreadyRunning(tab_id.to_string()).into());
            }
            Err(e) => {
                self.registry.end(tab_id, &execution_id);
                return Err(e);
            }
        }

        tokio::spawn(execution::start_watchdog(
            Arc::clone(&self.registry),
            self.states.clone(),
            tab_id.to_string(),
            execution_id.clone(),
            self.config.replay.watchdog(),
        ));

        info!("Starting '{}' in tab '{}' as {}", test_name, tab_id, execution_id);
        let coordinator = Arc::clone(self);
        tokio::spawn(coordinator.drive(
            page,
            RunStart::Fresh {
                test,
                tab_id: tab_id.to_string(),
                execution_id: execution_id.clone(),
            },
        ));
        Ok(execution_id)
    }

    /// Continue a persisted run in its tab
    pub async fn resume_test(self: &Arc<Self>, state: ExecutionState) -> Result<String> {
        let page = self.tabs.get_or_create_tab(&state.tab_id).await?;
        let execution_id = state.execution_id.clone();
        let coordinator = Arc::clone(self);
        tokio::spawn(coordinator.drive(page, RunStart::Resume(state)));
        Ok(execution_id)
    }

    /// Cooperative stop; false when the execution is not running
    pub fn force_stop(&self, execution_id: &str) -> bool {
        self.registry.request_stop(execution_id)
    }

    pub fn force_reset(&self) -> Result<usize> {
        execution::force_reset(&self.registry, &self.states)
    }

    /// Take the buffered notifications of one execution
    pub fn events(&self, execution_id: &str) -> Vec<ReplayEvent> {
        self.events
            .remove(execution_id)
            .map(|(_, events)| events)
            .unwrap_or_default()
    }

    pub fn list_tests(&self) -> Result<Vec<TestInfo>> {
        Ok(TestLibrary::new(&*self.store)
            .list()?
            .iter()
            .map(TestInfo::from)
            .collect())
    }

    pub fn get_test(&self, name: &str) -> Result<Option<StepSequence>> {
        TestLibrary::new(&*self.store).get(name)
    }

    pub fn save_test(&self, test: StepSequence) -> Result<()> {
        TestLibrary::new(&*self.store).save(test)
    }

    pub fn delete_test(&self, name: &str) -> Result<bool> {
        TestLibrary::new(&*self.store).delete(name)
    }

    pub fn settings(&self) -> Result<Settings> {
        Settings::load(&*self.store)
    }

    pub fn update_settings(
        &self,
        recording_delay: Option<u64>,
        replay_delay: Option<u64>,
    ) -> Result<Settings> {
        let mut settings = Settings::load(&*self.store)?;
        if let Some(delay) = recording_delay {
            settings.recording_delay = delay;
        }
        if let Some(delay) = replay_delay {
            settings.replay_delay = delay;
        }
        settings.save(&*self.store)?;
        Ok(settings)
    }

    pub async fn list_tabs(&self) -> Vec<TabInfo> {
        self.tabs.list_tabs().await
    }

    pub async fn close_tab(&self, tab_id: &str) -> bool {
        self.recordings.lock().await.remove(tab_id);
        self.tabs.close_tab(tab_id).await
    }

    /// Detach recorders and drop every tab
    pub async fn shutdown(&self) -> usize {
        let sessions: Vec<_> = self.recordings.lock().await.drain().collect();
        for (tab_id, shared) in sessions {
            if let Some(session) = shared.lock().await.take() {
                debug!("Abandoning recording '{}' in tab '{}'", session.test_name(), tab_id);
            }
        }
        self.tabs.close_all_tabs().await
    }

    fn engine(&self, page: Arc<P>) -> ReplayEngine<P> {
        ReplayEngine::new(page, Arc::clone(&self.store), Arc::clone(&self.registry))
            .with_resolver(Resolver::new(self.config.resolver.clone()))
            .with_visual_config(self.config.visual.clone())
            .with_replay_config(self.config.replay.clone())
    }

    /// Run one execution to a terminal outcome, resuming across navigations
    async fn drive(self: Arc<Self>, page: Arc<P>, start: RunStart) {
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(buffer_events(
            Arc::clone(&self.events),
            rx,
            self.config.replay.event_retention(),
        ));
        let engine = self.engine(Arc::clone(&page)).with_events(tx);
        // Tracks the step the run is at, for reporting a rejected run
        let mut current = match &start {
            RunStart::Fresh {
                test,
                tab_id,
                execution_id,
            } => ExecutionState {
                test_data: test.clone(),
                current_step_index: 0,
                start_time: now_millis(),
                tab_id: tab_id.clone(),
                execution_id: execution_id.clone(),
            },
            RunStart::Resume(state) => state.clone(),
        };
        let tab_id = current.tab_id.clone();
        let execution_id = current.execution_id.clone();

        let mut result = match start {
            RunStart::Fresh { test, .. } => {
                self.open_start_url(&*page, &test.start_url).await;
                engine.replay_test(test, &tab_id, &execution_id).await
            }
            RunStart::Resume(state) => engine.resume_test(state).await,
        };

        loop {
            match result {
                Ok(ReplayOutcome {
                    outcome: RunOutcome::NavigationPending(state),
                    ..
                }) => {
                    if let Err(e) = page.wait_ready(self.config.replay.ready_timeout()).await {
                        warn!("Page not ready after navigation: {}", e);
                    }
                    let state = match self.states.get(&state.tab_id) {
                        Ok(Some(persisted)) if persisted.execution_id == state.execution_id => {
                            persisted
                        }
                        Ok(_) => state,
                        Err(e) => {
                            warn!("Using in-memory execution state: {}", e);
                            state
                        }
                    };
                    current = state.clone();
                    result = engine.resume_test(state).await;
                }
                Ok(outcome) => {
                    debug!("Execution ended: {}", outcome.outcome.status());
                    break;
                }
                Err(e) => {
                    error!("Execution {} could not run: {}", execution_id, e);
                    // Rejected before the engine took over; release our claim
                    self.registry.end(&tab_id, &execution_id);
                    engine.emit(ReplayEvent::rejected(&current, &e));
                    break;
                }
            }
        }

        drop(engine);
        if let Err(e) = forwarder.await {
            warn!("Event buffer task failed: {}", e);
        }
    }

    async fn open_start_url(&self, page: &P, start_url: &str) {
        if start_url.is_empty() {
            return;
        }
        match page.current_url().await {
            Ok(current) if same_url(&current, start_url) => {}
            _ => {
                // A failed load surfaces as a failure of the first step
                if let Err(e) = page.navigate(start_url).await {
                    warn!("Failed to open {}: {}", start_url, e);
                }
            }
        }
    }
}

async fn buffer_events(
    events: Arc<DashMap<String, Vec<ReplayEvent>>>,
    mut rx: mpsc::UnboundedReceiver<ReplayEvent>,
    retention: Duration,
) {
    while let Some(event) = rx.recv().await {
        let execution_id = event.execution_id().to_string();
        let terminal = event.is_terminal();
        events.entry(execution_id.clone()).or_default().push(event);

        if terminal {
            tokio::spawn(expire_events(Arc::clone(&events), execution_id, retention));
        }
    }
}

/// Forget a finished run's notifications if no client drained them in time
async fn expire_events(
    events: Arc<DashMap<String, Vec<ReplayEvent>>>,
    execution_id: String,
    retention: Duration,
) {
    tokio::time::sleep(retention).await;
    let expired = events.remove_if(&execution_id, |_, buffered| {
        buffered.iter().any(ReplayEvent::is_terminal)
    });
    if expired.is_some() {
        debug!("Dropped undrained events of execution {}", execution_id);
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod coordinator_test;
