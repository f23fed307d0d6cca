use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::WebDriverConfig;
use crate::page::Page;
use crate::types::ViewportSize;
use crate::webdriver::Browser;

/// Opens the page behind a newly named tab
#[async_trait]
pub trait PageLauncher<P>: Send + Sync {
    async fn launch(&self, tab_name: &str) -> Result<P>;
}

/// Launches one WebDriver browser session per tab
pub struct BrowserLauncher {
    config: WebDriverConfig,
}

impl BrowserLauncher {
    pub fn new(config: WebDriverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageLauncher<Browser> for BrowserLauncher {
    async fn launch(&self, tab_name: &str) -> Result<Browser> {
        info!("Opening {} browser for tab '{}'", self.config.browser, tab_name);
        let viewport = self
            .config
            .viewport
            .as_deref()
            .map(ViewportSize::parse)
            .transpose()?;
        Browser::new(
            self.config.browser,
            self.config.url.as_deref(),
            viewport,
            self.config.headless,
        )
        .await
    }
}

/// Manages persistent browser tabs across requests
pub struct TabManager<P: Page> {
    launcher: Arc<dyn PageLauncher<P>>,
    tabs: Mutex<HashMap<String, PersistentTab<P>>>,
}

struct PersistentTab<P> {
    page: Arc<P>,
    created_at: Instant,
    last_used: Instant,
}

impl<P: Page> TabManager<P> {
    pub fn new(launcher: Arc<dyn PageLauncher<P>>) -> Self {
        Self {
            launcher,
            tabs: Mutex::new(HashMap::new()),
        }
    }

    /// Get the tab with the given name, launching a page for it if needed
    pub async fn get_or_create_tab(&self, name: &str) -> Result<Arc<P>> {
        let mut tabs = self.tabs.lock().await;

        if let Some(tab) = tabs.get_mut(name) {
            tab.last_used = Instant::now();
            return Ok(Arc::clone(&tab.page));
        }

        let page = Arc::new(self.launcher.launch(name).await?);
        tabs.insert(
            name.to_string(),
            PersistentTab {
                page: Arc::clone(&page),
                created_at: Instant::now(),
                last_used: Instant::now(),
            },
        );
        Ok(page)
    }

    /// Existing tab only
    pub async fn get_tab(&self, name: &str) -> Option<Arc<P>> {
        let tabs = self.tabs.lock().await;
        tabs.get(name).map(|tab| Arc::clone(&tab.page))
    }

    /// List all active tabs
    pub async fn list_tabs(&self) -> Vec<TabInfo> {
        let tabs = self.tabs.lock().await;
        let mut result = Vec::new();
        for (name, tab) in tabs.iter() {
            result.push(TabInfo {
                name: name.clone(),
                url: tab.page.current_url().await.ok(),
                age_seconds: tab.created_at.elapsed().as_secs(),
                last_used_seconds: tab.last_used.elapsed().as_secs(),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Close a specific tab
    pub async fn close_tab(&self, name: &str) -> bool {
        // WebDriver cleans up the session once the last handle is dropped
        self.tabs.lock().await.remove(name).is_some()
    }

    /// Close all tabs
    pub async fn close_all_tabs(&self) -> usize {
        let mut tabs = self.tabs.lock().await;
        let count = tabs.len();
        tabs.clear();
        count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub name: String,
    pub url: Option<String>,
    pub age_seconds: u64,
    pub last_used_seconds: u64,
}

#[cfg(test)]
#[path = "tab_manager_test.rs"]
mod tab_manager_test;
