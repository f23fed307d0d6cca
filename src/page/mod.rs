//! The page the engine drives
//!
//! Everything the recorder and replay engine need from a live document goes
//! through [`Page`]. [`crate::webdriver::Browser`] implements it over
//! WebDriver; [`memory::MemoryPage`] implements it over a parsed HTML string.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::recorder::RawEvent;
use crate::types::{BoundingBox, ScrollPosition};

/// Native input dispatched to a resolved element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Interaction {
    Click,
    Input { value: String },
    Change { value: String, checked: Option<bool> },
    Keypress { key: String },
}

impl Interaction {
    pub fn name(&self) -> &'static str {
        match self {
            Interaction::Click => "click",
            Interaction::Input { .. } => "input",
            Interaction::Change { .. } => "change",
            Interaction::Keypress { .. } => "keypress",
        }
    }
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Handle to an element in the current document
    type Element: Clone + Send + Sync + std::fmt::Debug;

    async fn current_url(&self) -> Result<String>;

    /// Load `url`; any previously obtained element handles become stale
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait until the document has finished loading
    async fn wait_ready(&self, timeout: Duration) -> Result<()>;

    /// All elements matching `selector`, in document order
    async fn query_all(&self, selector: &str) -> Result<Vec<Self::Element>>;

    /// Trimmed text content
    async fn element_text(&self, element: &Self::Element) -> Result<String>;

    /// Non-empty box and not hidden by `display` or `visibility`
    async fn element_visible(&self, element: &Self::Element) -> Result<bool>;

    /// Bounds relative to the viewport, in CSS pixels
    async fn element_rect(&self, element: &Self::Element) -> Result<BoundingBox>;

    /// Scroll so the element sits in the center of the viewport
    async fn scroll_into_view(&self, element: &Self::Element) -> Result<()>;

    async fn scroll_position(&self) -> Result<ScrollPosition>;

    async fn scroll_to(&self, position: ScrollPosition) -> Result<()>;

    async fn dispatch(&self, element: &Self::Element, interaction: &Interaction) -> Result<()>;

    /// Hide or restore recorder-owned UI so it does not show up in captures
    async fn set_overlays_hidden(&self, hidden: bool) -> Result<()>;

    /// PNG of the visible viewport
    async fn capture_viewport(&self) -> Result<Vec<u8>>;

    async fn device_pixel_ratio(&self) -> Result<f64>;

    /// Attach the capture listeners; idempotent
    async fn install_recorder(&self) -> Result<()>;

    /// Take every event captured since the last drain
    async fn drain_recorder_events(&self) -> Result<Vec<RawEvent>>;

    async fn uninstall_recorder(&self) -> Result<()>;
}

/// Query `selector` and keep only elements whose trimmed text equals `text`
pub async fn matching<P: Page + ?Sized>(
    page: &P,
    selector: &str,
    text: Option<&str>,
) -> Result<Vec<P::Element>> {
    let found = page.query_all(selector).await?;
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return Ok(found);
    };

    let mut kept = Vec::new();
    for element in found {
        if page.element_text(&element).await?.trim() == text {
            kept.push(element);
        }
    }
    Ok(kept)
}

/// Compare page URLs ignoring fragments and trailing-slash normalization
pub fn same_url(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(mut a), Ok(mut b)) => {
            a.set_fragment(None);
            b.set_fragment(None);
            a == b
        }
        _ => a.trim_end_matches('/') == b.trim_end_matches('/'),
    }
}
