use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::escape::{attr_selector, escape_ident};
use super::{ElementSnapshot, PathSegment, is_valid};
use crate::config::SelectorConfig;

/// Strategy that produced a selector, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Id,
    TestAttribute,
    Name,
    ClassList,
    Text,
    Path,
}

/// A generated locator plus the text it must be qualified with, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSelector {
    pub selector: String,
    /// Set only for the text strategy, where the tag alone is ambiguous
    #[serde(default)]
    pub text: Option<String>,
    pub strategy: Strategy,
}

const TEST_ATTRIBUTES: [&str; 3] = ["data-testid", "data-cy", "data-test"];
const LABEL_ATTRIBUTES: [&str; 2] = ["aria-label", "role"];
const MAX_CLASS_WINDOW: usize = 3;
const MAX_PATH_CLASSES: usize = 2;

/// Generate a selector for `target` that matches exactly one element.
///
/// Candidates are tried in strict priority order against `count`, which
/// reports how many elements on the document the target was captured from
/// match a selector (and text, when set). A candidate that does not parse,
/// or that the document rejects, is skipped. The structural path is the
/// last resort and is returned even when it is not unique.
pub fn generate<F>(
    target: &ElementSnapshot,
    config: &SelectorConfig,
    mut count: F,
) -> Result<GeneratedSelector>
where
    F: FnMut(&str, Option<&str>) -> Result<usize>,
{
    for (strategy, selector, text) in candidates(target, config) {
        if !is_valid(&selector) {
            debug!("Skipping invalid {:?} candidate: {}", strategy, selector);
            continue;
        }

        match count(&selector, text.as_deref()) {
            Ok(1) => {
                debug!("Generated {:?} selector: {}", strategy, selector);
                return Ok(GeneratedSelector {
                    selector,
                    text,
                    strategy,
                });
            }
            Ok(found) => {
                debug!(
                    "{:?} candidate '{}' matched {} elements",
                    strategy, selector, found
                );
            }
            Err(e) => debug!("{:?} candidate '{}' rejected: {}", strategy, selector, e),
        }
    }

    let fallback = path_selector(target, config)?;
    let found = count(&fallback.selector, None).unwrap_or(0);
    if found != 1 {
        warn!(
            "Structural selector '{}' matches {} elements; replay will use the first",
            fallback.selector, found
        );
    }
    Ok(fallback)
}

/// The structural path for `target`, without any uniqueness check
pub fn path_selector(target: &ElementSnapshot, config: &SelectorConfig) -> Result<GeneratedSelector> {
    let selector = structural_path(&target.path, config);
    if !is_valid(&selector) {
        anyhow::bail!(
            "Could not generate a valid selector for <{}> (path '{}')",
            target.tag,
            selector
        );
    }

    Ok(GeneratedSelector {
        selector,
        text: None,
        strategy: Strategy::Path,
    })
}

/// Ordered candidates for every strategy except the structural path
fn candidates(
    target: &ElementSnapshot,
    config: &SelectorConfig,
) -> Vec<(Strategy, String, Option<String>)> {
    let tag = target.tag.to_ascii_lowercase();
    let mut out = Vec::new();

    if let Some(id) = target.id.as_deref().filter(|id| !id.is_empty()) {
        out.push((Strategy::Id, format!("#{}", escape_ident(id)), None));
    }

    for attr in TEST_ATTRIBUTES {
        if let Some(value) = target.attr(attr) {
            out.push((Strategy::TestAttribute, attr_selector(attr, value), None));
        }
    }
    for attr in LABEL_ATTRIBUTES {
        if let Some(value) = target.attr(attr) {
            out.push((
                Strategy::TestAttribute,
                format!("{}{}", tag, attr_selector(attr, value)),
                None,
            ));
        }
    }

    if let Some(name) = target.attr("name") {
        out.push((
            Strategy::Name,
            format!("{}{}", tag, attr_selector("name", name)),
            None,
        ));
    }

    let classes: Vec<&str> = target
        .classes
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .collect();
    if !classes.is_empty() {
        out.push((Strategy::ClassList, class_selector(&tag, &classes), None));

        // Sliding windows of contiguous classes, shortest first
        for size in 1..=MAX_CLASS_WINDOW.min(classes.len()) {
            if size == classes.len() {
                break;
            }
            for window in classes.windows(size) {
                out.push((Strategy::ClassList, class_selector(&tag, window), None));
            }
        }
    }

    let text = target.text.trim();
    if !text.is_empty() && text.chars().count() < config.max_text_len {
        out.push((Strategy::Text, tag.clone(), Some(text.to_string())));
    }

    out
}

fn class_selector(tag: &str, classes: &[&str]) -> String {
    let mut selector = tag.to_string();
    for class in classes {
        selector.push('.');
        selector.push_str(&escape_ident(class));
    }
    selector
}

/// `tag[#id | .class(≤2)][:nth-child(n)]` segments joined with `>`, capped at the configured depth
pub fn structural_path(path: &[PathSegment], config: &SelectorConfig) -> String {
    let mut segments = Vec::new();

    for segment in path.iter().take(config.max_path_depth.max(1)) {
        let tag = segment.tag.to_ascii_lowercase();
        if tag == "html" {
            break;
        }

        if let Some(id) = segment.id.as_deref().filter(|id| !id.is_empty()) {
            segments.push(format!("{}#{}", tag, escape_ident(id)));
            // An id anchors the path; nothing above it adds precision
            break;
        }

        let mut part = tag;
        for class in segment
            .classes
            .iter()
            .filter(|c| !c.is_empty())
            .take(MAX_PATH_CLASSES)
        {
            part.push('.');
            part.push_str(&escape_ident(class));
        }
        if segment.same_tag_siblings > 1 && segment.position <= config.max_nth_child {
            part.push_str(&format!(":nth-child({})", segment.position));
        }
        segments.push(part);
    }

    segments.reverse();
    segments.join(" > ")
}

#[cfg(test)]
#[path = "generate_test.rs"]
mod generate_test;
