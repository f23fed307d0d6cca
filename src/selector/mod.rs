//! Selector generation and resolution
//!
//! Generation turns an element captured at recording time into a durable,
//! unique locator. Resolution re-finds that element at replay time, tolerating
//! asynchronous rendering but not content drift.

pub mod escape;
pub mod generate;
pub mod resolve;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use generate::{GeneratedSelector, Strategy, generate, path_selector};
pub use resolve::Resolver;

/// Whether a selector parses as CSS (Selectors Level 4 grammar)
pub fn is_valid(selector: &str) -> bool {
    !selector.trim().is_empty() && scraper::Selector::parse(selector).is_ok()
}

/// What the page reports about an event target, enough to build a locator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    /// Lowercase tag name
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Trimmed text content
    #[serde(default)]
    pub text: String,
    /// Ancestry from the element itself up to (and including) `<html>`
    #[serde(default)]
    pub path: Vec<PathSegment>,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Lowercased `type` attribute of inputs
    pub fn input_type(&self) -> Option<String> {
        self.attr("type").map(|t| t.to_ascii_lowercase())
    }
}

/// One element on the path from the target to the document root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSegment {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    /// 1-based position among all element siblings (`:nth-child` index)
    pub position: usize,
    /// Number of element siblings, including this one, sharing the tag
    pub same_tag_siblings: usize,
}
