//! Recording sessions
//!
//! A [`RecordingSession`] owns the capture script's lifetime on one page: it is
//! installed when the session starts and removed when the session is stopped
//! or dropped. [`RecordingSession::poll`] turns whatever the script captured
//! into steps; out-of-band screenshots are kept apart and merged by timestamp
//! when the session stops.

mod event;
pub mod script;

pub use event::{RawEvent, RawEventKind};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SelectorConfig;
use crate::page::{Page, same_url};
use crate::selector::{self, ElementSnapshot};
use crate::step::{Action, Step, StepSequence};
use crate::store::{
    self, RECORDING_STATE_KEY, RecordingState, Settings, Store, TestLibrary, recording_steps_key,
};
use crate::types::now_millis;
use crate::visual;

/// Keys worth recording; everything else is typed text covered by `input`
const RECORDED_KEYS: [&str; 2] = ["Enter", "Tab"];

/// In-flight steps persisted under `recordingSteps:<name>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingBuffer {
    pub start_url: String,
    /// Steps synthesized from page events
    pub recorded: Vec<Step>,
    /// Steps captured outside the page, such as screenshots
    pub external: Vec<Step>,
}

/// Starts recording sessions on a page
pub struct Recorder<P: Page + 'static> {
    page: Arc<P>,
    store: Arc<dyn Store>,
    selector_config: SelectorConfig,
}

impl<P: Page + 'static> Recorder<P> {
    pub fn new(page: Arc<P>, store: Arc<dyn Store>) -> Self {
        Self {
            page,
            store,
            selector_config: SelectorConfig::default(),
        }
    }

    pub fn with_selector_config(mut self, config: SelectorConfig) -> Self {
        self.selector_config = config;
        self
    }

    /// Install the capture script and mark `test_name` as being recorded
    pub async fn start(&self, test_name: &str) -> Result<RecordingSession<P>> {
        if test_name.trim().is_empty() {
            anyhow::bail!("Test name must not be empty");
        }

        let existing: Option<RecordingState> = store::load(&*self.store, RECORDING_STATE_KEY)?;
        if let Some(state) = existing
            && state.is_recording
        {
            warn!(
                "Replacing stale recording marker for '{}'",
                state.current_test.unwrap_or_default()
            );
        }

        let settings = Settings::load(&*self.store)?;
        let start_url = self.page.current_url().await?;

        self.page
            .install_recorder()
            .await
            .context("Failed to install the capture script")?;

        store::save(
            &*self.store,
            RECORDING_STATE_KEY,
            &RecordingState {
                is_recording: true,
                current_test: Some(test_name.to_string()),
            },
        )?;

        let buffer = RecordingBuffer {
            start_url: start_url.clone(),
            ..Default::default()
        };
        store::save(&*self.store, &recording_steps_key(test_name), &buffer)?;

        info!("Recording '{}' from {}", test_name, start_url);

        Ok(RecordingSession {
            page: Arc::clone(&self.page),
            store: Arc::clone(&self.store),
            selector_config: self.selector_config.clone(),
            recording_delay: Duration::from_millis(settings.recording_delay),
            test_name: test_name.to_string(),
            last_url: start_url,
            buffer,
            stopped: false,
        })
    }
}

/// One active recording; dropping it without [`stop`](Self::stop) detaches the capture script
pub struct RecordingSession<P: Page + 'static> {
    page: Arc<P>,
    store: Arc<dyn Store>,
    selector_config: SelectorConfig,
    recording_delay: Duration,
    test_name: String,
    last_url: String,
    buffer: RecordingBuffer,
    stopped: bool,
}

impl<P: Page + 'static> RecordingSession<P> {
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn buffer(&self) -> &RecordingBuffer {
        &self.buffer
    }

    /// Collect new events from the page, returning the steps they produced.
    ///
    /// A changed URL means the page navigated and took the capture script with
    /// it: a navigation step is recorded and the script is installed again once
    /// the new page has had `recording_delay` to settle.
    pub async fn poll(&mut self) -> Result<Vec<Step>> {
        let mut produced = Vec::new();

        let url = self.page.current_url().await?;
        if !same_url(&url, &self.last_url) {
            info!("Page navigated to {}", url);
            let step = Step::new(Action::Navigation { url: url.clone() }, now_millis(), &url);
            self.buffer.recorded.push(step.clone());
            produced.push(step);
            self.last_url = url;

            tokio::time::sleep(self.recording_delay).await;
            self.page.wait_ready(Duration::from_secs(10)).await?;
            self.page.install_recorder().await?;
        }

        let events = self.page.drain_recorder_events().await?;
        for event in events {
            if let Some(step) = self.synthesize(event)? {
                produced.push(step);
            }
        }

        if !produced.is_empty() {
            self.persist()?;
        }
        Ok(produced)
    }

    /// Turn one raw event into a step, coalescing consecutive typing into one input step.
    ///
    /// The locator comes from the event, since only the page at event time
    /// can say which candidate was unique. It is re-validated here; a missing
    /// or unparsable one falls back to the structural path of the snapshot.
    fn synthesize(&mut self, event: RawEvent) -> Result<Option<Step>> {
        let RawEvent {
            kind,
            target,
            timestamp,
            url,
            scroll,
            selector: captured,
        } = event;

        if !should_record(&kind, &target) {
            debug!("Ignoring {:?} on <{}>", kind, target.tag);
            return Ok(None);
        }

        let generated = match captured {
            Some(captured) if selector::is_valid(&captured.selector) => captured,
            Some(captured) => {
                warn!(
                    "Discarding unparsable selector '{}' for <{}>",
                    captured.selector, target.tag
                );
                selector::path_selector(&target, &self.selector_config)?
            }
            None => selector::path_selector(&target, &self.selector_config)?,
        };
        let selector = generated.selector;

        let action = match kind {
            RawEventKind::Click { scroll_before } => {
                let text = generated.text.or_else(|| {
                    let text = target.text.trim();
                    (!text.is_empty() && text.chars().count() < self.selector_config.max_text_len)
                        .then(|| text.to_string())
                });
                Action::Click {
                    selector,
                    text,
                    scroll_before,
                }
            }
            RawEventKind::Input { value } => {
                if let Some(last) = self.buffer.recorded.last_mut()
                    && let Action::Input {
                        selector: last_selector,
                        value: last_value,
                    } = &mut last.action
                    && *last_selector == selector
                {
                    *last_value = value;
                    last.timestamp = timestamp;
                    return Ok(Some(last.clone()));
                }
                Action::Input { selector, value }
            }
            RawEventKind::Change { value, checked } => Action::Change {
                selector,
                value,
                checked,
            },
            RawEventKind::Keydown { key } => Action::Keypress { selector, key },
        };

        let mut step = Step::new(action, timestamp, url);
        if let Some(scroll) = scroll {
            step = step.with_scroll(scroll);
        }
        debug!("Recorded {} on {:?}", step.kind(), step.selector());
        self.buffer.recorded.push(step.clone());
        Ok(Some(step))
    }

    /// Capture the viewport as an out-of-band screenshot step
    pub async fn capture_screenshot(&mut self) -> Result<Step> {
        let png = capture_clean(&*self.page).await?;
        let url = self.page.current_url().await?;
        let scroll = self.page.scroll_position().await?;

        let step = Step::new(Action::Screenshot, now_millis(), url)
            .with_scroll(scroll)
            .with_screenshot(visual::encode_data_url(&png));
        self.buffer.external.push(step.clone());
        self.persist()?;

        info!("Captured screenshot step for '{}'", self.test_name);
        Ok(step)
    }

    /// Flush pending events, detach the capture script and save the finished test
    pub async fn stop(mut self) -> Result<StepSequence> {
        if let Err(e) = self.poll().await {
            warn!("Final event drain failed: {}", e);
        }
        self.stopped = true;

        if let Err(e) = self.page.uninstall_recorder().await {
            warn!("Failed to detach the capture script: {}", e);
        }

        let buffer = std::mem::take(&mut self.buffer);
        let test = StepSequence::merge(
            self.test_name.clone(),
            buffer.start_url,
            buffer.recorded,
            buffer.external,
        );

        TestLibrary::new(&*self.store).save(test.clone())?;
        self.store.remove(&recording_steps_key(&self.test_name))?;
        store::save(&*self.store, RECORDING_STATE_KEY, &RecordingState::default())?;

        info!("Saved test '{}' with {} steps", test.name, test.len());
        Ok(test)
    }

    fn persist(&self) -> Result<()> {
        store::save(
            &*self.store,
            &recording_steps_key(&self.test_name),
            &self.buffer,
        )
    }
}

impl<P: Page + 'static> Drop for RecordingSession<P> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        // Async cleanup needs a runtime; without one the page is going away anyway
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let page = Arc::clone(&self.page);
            let name = self.test_name.clone();
            handle.spawn(async move {
                if let Err(e) = page.uninstall_recorder().await {
                    debug!("Capture script for '{}' not detached: {}", name, e);
                }
            });
        }
    }
}

/// Which captured events become steps
fn should_record(kind: &RawEventKind, target: &ElementSnapshot) -> bool {
    let input_type = target.input_type();
    let toggles = target.tag == "input"
        && matches!(input_type.as_deref(), Some("checkbox") | Some("radio"));

    match kind {
        RawEventKind::Click { .. } => true,
        // Toggles and selects report through `change`
        RawEventKind::Input { .. } => !toggles && target.tag != "select",
        RawEventKind::Change { .. } => toggles || target.tag == "select",
        RawEventKind::Keydown { key } => RECORDED_KEYS.contains(&key.as_str()),
    }
}

/// Capture the viewport with recorder-owned UI hidden, restoring it afterwards
pub async fn capture_clean<P: Page + ?Sized>(page: &P) -> Result<Vec<u8>> {
    page.set_overlays_hidden(true).await?;
    let captured = page.capture_viewport().await;
    if let Err(e) = page.set_overlays_hidden(false).await {
        warn!("Failed to restore overlays: {}", e);
    }
    captured
}
