//! Engine configuration loaded from `~/.retrace/config.toml`
//!
//! Every section is optional; missing keys fall back to defaults. CLI flags
//! override individual values after loading.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::replay::DiffDecision;
use crate::webdriver::BrowserType;

/// Root data directory: `~/.retrace`
pub fn data_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir().context("Unable to determine home directory")?;
    Ok(home_dir.join(".retrace"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub selector: SelectorConfig,
    pub visual: VisualConfig,
    pub replay: ReplayConfig,
    pub webdriver: WebDriverConfig,
}

impl Config {
    /// Load `~/.retrace/config.toml`, or defaults when it does not exist
    pub fn load_default() -> Result<Self> {
        Self::load(&data_dir()?.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Retry and visibility budget for resolving a selector at replay time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub visibility_timeout_ms: u64,
    pub visibility_poll_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            retry_delay_ms: 1000,
            visibility_timeout_ms: 5000,
            visibility_poll_ms: 100,
        }
    }
}

impl ResolverConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn visibility_poll(&self) -> Duration {
        Duration::from_millis(self.visibility_poll_ms.max(1))
    }
}

/// Limits for selector generation at recording time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Maximum segments in a structural path selector
    pub max_path_depth: usize,
    /// Text longer than this (in chars) is not used as a qualifier
    pub max_text_len: usize,
    /// `:nth-child` is only emitted up to this position
    pub max_nth_child: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_path_depth: 5,
            max_text_len: 50,
            max_nth_child: 10,
        }
    }
}

/// Pixel comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Percentage of differing pixels above which a checkpoint needs a decision
    pub threshold: f64,
    /// Mean per-channel difference (0-255) above which a pixel counts as different
    pub pixel_threshold: f64,
    pub decode_timeout_ms: u64,
    /// Decision applied when a checkpoint exceeds the threshold
    pub on_diff: DiffDecision,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            pixel_threshold: 10.0,
            decode_timeout_ms: 5000,
            on_diff: DiffDecision::Stop,
        }
    }
}

impl VisualConfig {
    /// Near-zero tolerance, for pages expected to render pixel-identically
    pub fn strict() -> Self {
        Self {
            threshold: 0.01,
            ..Self::default()
        }
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

/// Timing of the replay loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub scroll_poll_ms: u64,
    pub scroll_max_polls: u32,
    /// Watchdog on the replay start handshake
    pub watchdog_ms: u64,
    /// How long to wait for a page to finish loading after navigation
    pub ready_timeout_ms: u64,
    /// How long a finished run's undrained notifications are kept
    pub event_retention_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            scroll_poll_ms: 100,
            scroll_max_polls: 20,
            watchdog_ms: 30_000,
            ready_timeout_ms: 10_000,
            event_retention_ms: 600_000,
        }
    }
}

impl ReplayConfig {
    pub fn scroll_poll(&self) -> Duration {
        Duration::from_millis(self.scroll_poll_ms.max(1))
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn event_retention(&self) -> Duration {
        Duration::from_millis(self.event_retention_ms)
    }
}

/// Browser the daemon drives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    pub browser: BrowserType,
    /// Explicit WebDriver endpoint; defaults depend on the browser
    pub url: Option<String>,
    pub headless: bool,
    /// Viewport as WIDTHxHEIGHT
    pub viewport: Option<String>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            browser: BrowserType::Chrome,
            url: None,
            headless: true,
            viewport: Some("1280x800".to_string()),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
