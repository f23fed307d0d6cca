//! In-memory page over a parsed HTML string
//!
//! `scraper` documents are not `Send`, so the page keeps its markup as a
//! string and parses it for every query. Element handles are positions in
//! document order, tagged with the navigation generation they came from.

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{ImageBuffer, Rgba};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{Interaction, Page};
use crate::recorder::RawEvent;
use crate::config::SelectorConfig;
use crate::selector::{self, ElementSnapshot, PathSegment};
use crate::types::{BoundingBox, ScrollPosition, ViewportSize};

const ROW_HEIGHT: f64 = 20.0;
const ROW_WIDTH: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryElement {
    index: usize,
    generation: u64,
}

/// An interaction that reached an element
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// `tag#id`, or just the tag when the element has no id
    pub target: String,
    pub interaction: Interaction,
}

struct Inner {
    url: String,
    html: String,
    generation: u64,
    routes: HashMap<String, String>,
    scroll: ScrollPosition,
    viewport: ViewportSize,
    viewport_png: Option<Vec<u8>>,
    device_pixel_ratio: f64,
    overlays_hidden: bool,
    /// Overlay state observed by each capture
    captures: Vec<bool>,
    /// Scroll offset at each capture
    capture_scrolls: Vec<ScrollPosition>,
    recorder_installed: bool,
    recorder_installs: usize,
    pending_events: Vec<RawEvent>,
    dispatched: Vec<Dispatched>,
    queries: usize,
    deferred_html: Option<(usize, String)>,
    fail_next_dispatch: Option<String>,
}

pub struct MemoryPage {
    inner: Mutex<Inner>,
}

impl MemoryPage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                url: url.to_string(),
                html: html.to_string(),
                generation: 0,
                routes: HashMap::new(),
                scroll: ScrollPosition::default(),
                viewport: ViewportSize {
                    width: 320,
                    height: 240,
                },
                viewport_png: None,
                device_pixel_ratio: 1.0,
                overlays_hidden: false,
                captures: Vec::new(),
                capture_scrolls: Vec::new(),
                recorder_installed: false,
                recorder_installs: 0,
                pending_events: Vec::new(),
                dispatched: Vec::new(),
                queries: 0,
                deferred_html: None,
                fail_next_dispatch: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve `html` when `url` is navigated to
    pub fn route(&self, url: &str, html: &str) {
        self.lock().routes.insert(url.to_string(), html.to_string());
    }

    /// Replace the document in place, keeping the URL and handles
    pub fn set_html(&self, html: &str) {
        self.lock().html = html.to_string();
    }

    /// Replace the document once `queries` more selector queries have run
    pub fn set_html_after_queries(&self, queries: usize, html: &str) {
        let mut inner = self.lock();
        let at = inner.queries + queries;
        inner.deferred_html = Some((at, html.to_string()));
    }

    pub fn set_viewport_png(&self, png: Vec<u8>) {
        self.lock().viewport_png = Some(png);
    }

    pub fn set_device_pixel_ratio(&self, ratio: f64) {
        self.lock().device_pixel_ratio = ratio;
    }

    /// Make the next dispatched interaction fail with `message`
    pub fn fail_next_dispatch(&self, message: &str) {
        self.lock().fail_next_dispatch = Some(message.to_string());
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.lock().dispatched.clone()
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries
    }

    pub fn recorder_installed(&self) -> bool {
        self.lock().recorder_installed
    }

    pub fn recorder_installs(&self) -> usize {
        self.lock().recorder_installs
    }

    pub fn overlays_hidden(&self) -> bool {
        self.lock().overlays_hidden
    }

    /// Overlay visibility at each viewport capture so far
    pub fn captures(&self) -> Vec<bool> {
        self.lock().captures.clone()
    }

    /// Scroll offset at each viewport capture so far
    pub fn capture_scrolls(&self) -> Vec<ScrollPosition> {
        self.lock().capture_scrolls.clone()
    }

    /// Hand an event to the capture script; dropped when it is not installed.
    ///
    /// Like the browser script, the selector is chosen against the document
    /// as it is at this moment, unless the event already carries one.
    pub fn emit(&self, mut event: RawEvent) -> bool {
        let mut inner = self.lock();
        if !inner.recorder_installed {
            return false;
        }
        if event.selector.is_none() {
            let html = inner.html.clone();
            event.selector = selector::generate(&event.target, &SelectorConfig::default(), |sel, text| {
                count_matching(&html, sel, text)
            })
            .ok();
        }
        inner.pending_events.push(event);
        true
    }

    /// Elements matching `selector` (and `text`, when set) in the current document
    pub fn count_matching(&self, selector: &str, text: Option<&str>) -> Result<usize> {
        let html = self.lock().html.clone();
        count_matching(&html, selector, text)
    }

    /// Snapshot of the first element matching `selector`, as the capture script reports it
    pub fn snapshot_of(&self, selector: &str) -> Result<ElementSnapshot> {
        let html = self.lock().html.clone();
        let parsed = parse_selector(selector)?;
        let doc = Html::parse_document(&html);
        let element = doc
            .select(&parsed)
            .next()
            .with_context(|| format!("No element matches '{}'", selector))?;
        Ok(snapshot(element))
    }

    fn element_info<T>(
        &self,
        element: &MemoryElement,
        f: impl FnOnce(ElementRef<'_>, usize) -> T,
    ) -> Result<T> {
        let inner = self.lock();
        if element.generation != inner.generation {
            anyhow::bail!("Stale element reference: the page has navigated");
        }
        let doc = Html::parse_document(&inner.html);
        let el = elements(&doc)
            .into_iter()
            .nth(element.index)
            .context("Stale element reference: element no longer in the document")?;
        Ok(f(el, element.index))
    }

    fn document_rect(&self, element: &MemoryElement) -> Result<Option<BoundingBox>> {
        self.element_info(element, |el, index| {
            if is_hidden(el) {
                None
            } else {
                Some(BoundingBox {
                    x: 0.0,
                    y: index as f64 * ROW_HEIGHT,
                    width: ROW_WIDTH,
                    height: ROW_HEIGHT,
                })
            }
        })
    }
}

fn count_matching(html: &str, selector: &str, text: Option<&str>) -> Result<usize> {
    let parsed = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let text = text.filter(|t| !t.is_empty());
    Ok(doc
        .select(&parsed)
        .filter(|el| text.is_none_or(|t| text_of(*el) == t))
        .count())
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("Invalid selector '{}': {:?}", selector, e))
}

/// Every element in document order, starting with `<html>`
fn elements(doc: &Html) -> Vec<ElementRef<'_>> {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .collect()
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    let hides = |e: ElementRef<'_>| {
        let v = e.value();
        if v.attr("hidden").is_some() {
            return true;
        }
        if v.name() == "input" && v.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
            return true;
        }
        let style: String = v
            .attr("style")
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        style.contains("display:none") || style.contains("visibility:hidden")
    };

    hides(el) || el.ancestors().filter_map(ElementRef::wrap).any(hides)
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn path_segment(el: ElementRef<'_>) -> PathSegment {
    let value = el.value();
    let (position, same_tag_siblings) = match el.parent() {
        Some(parent) => {
            let siblings: Vec<ElementRef<'_>> =
                parent.children().filter_map(ElementRef::wrap).collect();
            let position = siblings
                .iter()
                .position(|s| s.id() == el.id())
                .map_or(1, |p| p + 1);
            let same = siblings
                .iter()
                .filter(|s| s.value().name() == value.name())
                .count();
            (position, same)
        }
        None => (1, 1),
    };

    PathSegment {
        tag: value.name().to_string(),
        id: value.id().map(str::to_string),
        classes: value.classes().map(str::to_string).collect(),
        position,
        same_tag_siblings,
    }
}

fn snapshot(el: ElementRef<'_>) -> ElementSnapshot {
    let value = el.value();
    let mut path = vec![path_segment(el)];
    path.extend(
        el.ancestors()
            .filter_map(ElementRef::wrap)
            .map(path_segment),
    );

    ElementSnapshot {
        tag: value.name().to_string(),
        id: value.id().map(str::to_string),
        classes: value.classes().map(str::to_string).collect(),
        attributes: value
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        text: text_of(el),
        path,
    }
}

fn describe(el: ElementRef<'_>) -> String {
    match el.value().id() {
        Some(id) => format!("{}#{}", el.value().name(), id),
        None => el.value().name().to_string(),
    }
}

#[async_trait]
impl Page for MemoryPage {
    type Element = MemoryElement;

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut inner = self.lock();
        let html = inner
            .routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| "<html><head></head><body></body></html>".to_string());
        inner.url = url.to_string();
        inner.html = html;
        inner.generation += 1;
        inner.scroll = ScrollPosition::default();
        inner.recorder_installed = false;
        inner.pending_events.clear();
        inner.overlays_hidden = false;
        Ok(())
    }

    async fn wait_ready(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<MemoryElement>> {
        let parsed = parse_selector(selector)?;
        let mut inner = self.lock();
        inner.queries += 1;
        let due = matches!(&inner.deferred_html, Some((at, _)) if inner.queries > *at);
        if due && let Some((_, html)) = inner.deferred_html.take() {
            inner.html = html;
        }

        let doc = Html::parse_document(&inner.html);
        let all = elements(&doc);
        let generation = inner.generation;
        Ok(doc
            .select(&parsed)
            .filter_map(|m| all.iter().position(|e| e.id() == m.id()))
            .map(|index| MemoryElement { index, generation })
            .collect())
    }

    async fn element_text(&self, element: &MemoryElement) -> Result<String> {
        self.element_info(element, |el, _| text_of(el))
    }

    async fn element_visible(&self, element: &MemoryElement) -> Result<bool> {
        Ok(self.document_rect(element)?.is_some())
    }

    async fn element_rect(&self, element: &MemoryElement) -> Result<BoundingBox> {
        let scroll = self.lock().scroll;
        Ok(match self.document_rect(element)? {
            Some(rect) => BoundingBox {
                x: rect.x - scroll.x,
                y: rect.y - scroll.y,
                ..rect
            },
            None => BoundingBox::default(),
        })
    }

    async fn scroll_into_view(&self, element: &MemoryElement) -> Result<()> {
        if let Some(rect) = self.document_rect(element)? {
            let mut inner = self.lock();
            let half = f64::from(inner.viewport.height) / 2.0;
            inner.scroll.y = (rect.y + rect.height / 2.0 - half).max(0.0);
        }
        Ok(())
    }

    async fn scroll_position(&self) -> Result<ScrollPosition> {
        Ok(self.lock().scroll)
    }

    async fn scroll_to(&self, position: ScrollPosition) -> Result<()> {
        self.lock().scroll = ScrollPosition::new(position.x.max(0.0), position.y.max(0.0));
        Ok(())
    }

    async fn dispatch(&self, element: &MemoryElement, interaction: &Interaction) -> Result<()> {
        let target = self.element_info(element, |el, _| describe(el))?;
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next_dispatch.take() {
            anyhow::bail!("{}", message);
        }
        inner.dispatched.push(Dispatched {
            target,
            interaction: interaction.clone(),
        });
        Ok(())
    }

    async fn set_overlays_hidden(&self, hidden: bool) -> Result<()> {
        self.lock().overlays_hidden = hidden;
        Ok(())
    }

    async fn capture_viewport(&self) -> Result<Vec<u8>> {
        let (png, size) = {
            let mut inner = self.lock();
            let (hidden, scroll) = (inner.overlays_hidden, inner.scroll);
            inner.captures.push(hidden);
            inner.capture_scrolls.push(scroll);
            (inner.viewport_png.clone(), inner.viewport)
        };
        match png {
            Some(png) => Ok(png),
            None => {
                let blank = ImageBuffer::from_pixel(size.width, size.height, Rgba([255, 255, 255, 255]));
                crate::visual::encode_png(&blank)
            }
        }
    }

    async fn device_pixel_ratio(&self) -> Result<f64> {
        Ok(self.lock().device_pixel_ratio)
    }

    async fn install_recorder(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.recorder_installed {
            inner.recorder_installed = true;
            inner.recorder_installs += 1;
        }
        Ok(())
    }

    async fn drain_recorder_events(&self) -> Result<Vec<RawEvent>> {
        Ok(std::mem::take(&mut self.lock().pending_events))
    }

    async fn uninstall_recorder(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.recorder_installed = false;
        inner.pending_events.clear();
        Ok(())
    }
}
