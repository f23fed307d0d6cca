use serde::{Deserialize, Serialize};

use crate::selector::{ElementSnapshot, GeneratedSelector};
use crate::types::ScrollPosition;

/// What the capture script saw, before it is turned into a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawEventKind {
    Click {
        /// Offset before the script scrolled the target to the viewport center
        #[serde(rename = "scrollBefore", default)]
        scroll_before: Option<ScrollPosition>,
    },
    Input {
        #[serde(default)]
        value: String,
    },
    Change {
        #[serde(default)]
        value: String,
        #[serde(default)]
        checked: Option<bool>,
    },
    Keydown {
        key: String,
    },
}

/// One DOM event reported by the capture script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(flatten)]
    pub kind: RawEventKind,
    pub target: ElementSnapshot,
    /// Epoch milliseconds at capture
    pub timestamp: u64,
    #[serde(default)]
    pub url: String,
    /// Viewport offset once the event was handled
    #[serde(default)]
    pub scroll: Option<ScrollPosition>,
    /// Locator chosen against the document at event time; absent when no
    /// candidate was unique and the structural path applies
    #[serde(default)]
    pub selector: Option<GeneratedSelector>,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, target: ElementSnapshot, timestamp: u64, url: &str) -> Self {
        Self {
            kind,
            target,
            timestamp,
            url: url.to_string(),
            scroll: None,
            selector: None,
        }
    }

    pub fn with_scroll(mut self, scroll: ScrollPosition) -> Self {
        self.scroll = Some(scroll);
        self
    }
}
