//! Replay progress that outlives a page load, and the registry of active runs
//!
//! [`ExecutionStateStore`] persists where a run is so it can resume after a
//! navigation. [`SessionRegistry`] is the in-process view: which execution owns
//! each tab, which executions were asked to stop, and whether a run has made
//! progress since it was started.

use anyhow::Result;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::errors::ReplayError;
use crate::step::StepSequence;
use crate::store::{self, EXECUTION_STATE_PREFIX, Store, execution_state_key};

/// Everything needed to continue a run on a freshly loaded page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub test_data: StepSequence,
    /// Index of the next step to execute
    pub current_step_index: usize,
    /// Epoch milliseconds when the run started
    pub start_time: u64,
    pub tab_id: String,
    pub execution_id: String,
}

/// Execution states keyed by tab
#[derive(Clone)]
pub struct ExecutionStateStore {
    store: Arc<dyn Store>,
}

impl ExecutionStateStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, tab_id: &str) -> Result<Option<ExecutionState>> {
        store::load(&*self.store, &execution_state_key(tab_id))
    }

    pub fn put(&self, state: &ExecutionState) -> Result<()> {
        debug!(
            "Persisting execution {} for tab '{}' at step {}",
            state.execution_id, state.tab_id, state.current_step_index
        );
        store::save(&*self.store, &execution_state_key(&state.tab_id), state)
    }

    /// [`put`](Self::put) on the blocking pool, for callers on the async runtime
    pub async fn persist(&self, state: &ExecutionState) -> Result<()> {
        let states = self.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || states.put(&state)).await?
    }

    pub fn clear(&self, tab_id: &str) -> Result<()> {
        self.store.remove(&execution_state_key(tab_id))
    }

    pub fn tabs(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(EXECUTION_STATE_PREFIX).map(str::to_string))
            .collect())
    }

    /// Remove every persisted execution state, returning how many there were
    pub fn clear_all(&self) -> Result<usize> {
        let tabs = self.tabs()?;
        for tab in &tabs {
            self.clear(tab)?;
        }
        Ok(tabs.len())
    }
}

struct ActiveRun {
    execution_id: String,
    progressed: Arc<AtomicBool>,
    signal: Arc<Notify>,
}

/// Active executions per tab plus stop requests per execution
#[derive(Default)]
pub struct SessionRegistry {
    active: DashMap<String, ActiveRun>,
    stop_requests: DashSet<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `tab_id` for `execution_id`; a tab already claimed by another run is rejected
    pub fn try_begin(&self, tab_id: &str, execution_id: &str) -> Result<(), ReplayError> {
        use dashmap::mapref::entry::Entry;

        match self.active.entry(tab_id.to_string()) {
            Entry::Occupied(entry) if entry.get().execution_id != execution_id => {
                Err(ReplayError::AlreadyRunning(tab_id.to_string()))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(ActiveRun {
                    execution_id: execution_id.to_string(),
                    progressed: Arc::new(AtomicBool::new(false)),
                    signal: Arc::new(Notify::new()),
                });
                Ok(())
            }
        }
    }

    pub fn active_execution(&self, tab_id: &str) -> Option<String> {
        self.active.get(tab_id).map(|run| run.execution_id.clone())
    }

    pub fn is_active(&self, tab_id: &str, execution_id: &str) -> bool {
        self.active
            .get(tab_id)
            .is_some_and(|run| run.execution_id == execution_id)
    }

    /// Tab currently running `execution_id`
    pub fn tab_of(&self, execution_id: &str) -> Option<String> {
        self.active
            .iter()
            .find(|entry| entry.value().execution_id == execution_id)
            .map(|entry| entry.key().clone())
    }

    /// Record that the run in `tab_id` reached a step boundary
    pub fn mark_progress(&self, tab_id: &str) {
        if let Some(run) = self.active.get(tab_id) {
            run.progressed.store(true, Ordering::SeqCst);
            run.signal.notify_one();
        }
    }

    /// Release the tab if `execution_id` still owns it
    pub fn end(&self, tab_id: &str, execution_id: &str) {
        let removed = self
            .active
            .remove_if(tab_id, |_, run| run.execution_id == execution_id);
        if let Some((_, run)) = removed {
            run.signal.notify_one();
        }
        self.stop_requests.remove(execution_id);
    }

    /// Ask a running execution to stop at its next step boundary
    pub fn request_stop(&self, execution_id: &str) -> bool {
        if self.tab_of(execution_id).is_none() {
            debug!("Stop requested for unknown execution {}", execution_id);
            return false;
        }
        self.stop_requests.insert(execution_id.to_string());
        true
    }

    pub fn is_stop_requested(&self, execution_id: &str) -> bool {
        self.stop_requests.contains(execution_id)
    }

    /// Drop every claim and flag every known execution for stopping
    pub fn reset(&self) -> usize {
        let ids: Vec<String> = self
            .active
            .iter()
            .map(|entry| entry.value().execution_id.clone())
            .collect();
        for entry in self.active.iter() {
            entry.value().signal.notify_one();
        }
        self.active.clear();
        for id in &ids {
            self.stop_requests.insert(id.clone());
        }
        ids.len()
    }

    /// Wait until the run in `tab_id` progresses or ends; false on timeout
    pub async fn wait_for_progress(&self, tab_id: &str, timeout: Duration) -> bool {
        let Some((progressed, signal)) = self
            .active
            .get(tab_id)
            .map(|run| (Arc::clone(&run.progressed), Arc::clone(&run.signal)))
        else {
            return true;
        };

        let wait = async {
            loop {
                if progressed.load(Ordering::SeqCst) || !self.active.contains_key(tab_id) {
                    return;
                }
                signal.notified().await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Guard the start of a run: if it makes no progress within `timeout`,
/// force-reset its tab so the tab is not wedged. Returns whether it fired.
pub async fn start_watchdog(
    registry: Arc<SessionRegistry>,
    states: ExecutionStateStore,
    tab_id: String,
    execution_id: String,
    timeout: Duration,
) -> bool {
    if registry.wait_for_progress(&tab_id, timeout).await {
        return false;
    }
    if !registry.is_active(&tab_id, &execution_id) {
        return false;
    }

    warn!(
        "Execution {} in tab '{}' made no progress within {:?}, resetting",
        execution_id, tab_id, timeout
    );
    registry.end(&tab_id, &execution_id);
    // Flagged after `end` so a late-starting run still halts
    registry.stop_requests.insert(execution_id.clone());
    if let Err(e) = states.clear(&tab_id) {
        warn!("Failed to clear execution state for '{}': {}", tab_id, e);
    }
    true
}

/// Hard recovery: forget every run and every persisted execution state
pub fn force_reset(registry: &SessionRegistry, states: &ExecutionStateStore) -> Result<usize> {
    let runs = registry.reset();
    let cleared = states.clear_all()?;
    info!(
        "Force reset: {} active runs stopped, {} execution states cleared",
        runs, cleared
    );
    Ok(runs.max(cleared))
}

#[cfg(test)]
#[path = "execution_test.rs"]
mod execution_test;
