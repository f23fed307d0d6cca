//! Step and step-sequence data model
//!
//! A [`StepSequence`] is what a recording produces and what a replay consumes.
//! Each [`Step`] carries one [`Action`], a tagged variant holding only the
//! fields relevant to that kind of step.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ScrollPosition;

/// The user action or checkpoint a step represents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Click {
        selector: String,
        /// Trimmed text of the target at recording time, used as a resolution filter
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Viewport offset before the recorder scrolled the target into view
        #[serde(
            rename = "scrollBefore",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        scroll_before: Option<ScrollPosition>,
    },
    Input {
        selector: String,
        value: String,
    },
    Change {
        selector: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checked: Option<bool>,
    },
    Keypress {
        selector: String,
        key: String,
    },
    Navigation {
        /// Destination; serialized apart from the step's own capture-time `url`
        #[serde(rename = "targetUrl")]
        url: String,
    },
    Screenshot,
}

/// Discriminant of [`Action`], used in reports and progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Click,
    Input,
    Change,
    Keypress,
    Navigation,
    Screenshot,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Click => "click",
            StepKind::Input => "input",
            StepKind::Change => "change",
            StepKind::Keypress => "keypress",
            StepKind::Navigation => "navigation",
            StepKind::Screenshot => "screenshot",
        };
        f.write_str(name)
    }
}

impl Action {
    pub fn kind(&self) -> StepKind {
        match self {
            Action::Click { .. } => StepKind::Click,
            Action::Input { .. } => StepKind::Input,
            Action::Change { .. } => StepKind::Change,
            Action::Keypress { .. } => StepKind::Keypress,
            Action::Navigation { .. } => StepKind::Navigation,
            Action::Screenshot => StepKind::Screenshot,
        }
    }

    /// Target selector for element steps, `None` for navigation and screenshot steps
    pub fn selector(&self) -> Option<&str> {
        match self {
            Action::Click { selector, .. }
            | Action::Input { selector, .. }
            | Action::Change { selector, .. }
            | Action::Keypress { selector, .. } => Some(selector),
            Action::Navigation { .. } | Action::Screenshot => None,
        }
    }

    /// Text filter applied when resolving the target
    pub fn expected_text(&self) -> Option<&str> {
        match self {
            Action::Click { text, .. } => text.as_deref().filter(|t| !t.is_empty()),
            _ => None,
        }
    }
}

/// One recorded user action or checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    /// Capture time in epoch milliseconds, used to order merged steps
    pub timestamp: u64,
    /// Page URL at capture time
    #[serde(default)]
    pub url: String,
    /// Viewport offset at capture time (post-scroll offset for clicks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_position: Option<ScrollPosition>,
    /// Baseline image as a `data:image/png;base64,` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Step {
    pub fn new(action: Action, timestamp: u64, url: impl Into<String>) -> Self {
        Self {
            action,
            timestamp,
            url: url.into(),
            scroll_position: None,
            screenshot: None,
        }
    }

    pub fn with_scroll(mut self, position: ScrollPosition) -> Self {
        self.scroll_position = Some(position);
        self
    }

    pub fn with_screenshot(mut self, data_url: impl Into<String>) -> Self {
        self.screenshot = Some(data_url.into());
        self
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    pub fn selector(&self) -> Option<&str> {
        self.action.selector()
    }
}

/// A named, ordered list of steps (a "test")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSequence {
    pub name: String,
    pub start_url: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<Step>,
}

impl StepSequence {
    pub fn new(name: impl Into<String>, start_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_url: start_url.into(),
            created_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    /// Build a finalized sequence from page-captured steps and out-of-band steps.
    ///
    /// The sort is stable, so on equal timestamps page-captured steps come first.
    pub fn merge(
        name: impl Into<String>,
        start_url: impl Into<String>,
        recorded: Vec<Step>,
        external: Vec<Step>,
    ) -> Self {
        let mut steps = recorded;
        steps.extend(external);
        steps.sort_by_key(|s| s.timestamp);

        Self {
            steps,
            ..Self::new(name, start_url)
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_ordered(&self) -> bool {
        self.steps.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    /// Replace the baseline image of one step; the only mutation allowed after finalization
    pub fn replace_baseline(&mut self, index: usize, data_url: String) -> Result<()> {
        let len = self.steps.len();
        let step = self.steps.get_mut(index).ok_or_else(|| {
            anyhow::anyhow!(
                "Step index {} out of bounds for test '{}' with {} steps",
                index,
                self.name,
                len
            )
        })?;
        step.screenshot = Some(data_url);
        Ok(())
    }
}

#[cfg(test)]
#[path = "step_test.rs"]
mod step_test;
