use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::page::{Interaction, Page};
use crate::recorder::{RawEvent, script};
use crate::types::{BoundingBox, ScrollPosition, ViewportSize};

/// WebDriver keys for the keypresses the recorder captures
const KEY_ENTER: &str = "\u{E007}";
const KEY_TAB: &str = "\u{E004}";

/// Browser instance for WebDriver automation
pub struct Browser {
    pub(crate) client: Client,
    browser_type: BrowserType,
}

/// Supported browser types
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BrowserType {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome/Chromium
    Chrome,
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    /// Parse browser type from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(BrowserType::Firefox),
            "chrome" | "chromium" => Ok(BrowserType::Chrome),
            _ => anyhow::bail!("Unsupported browser: {}", s),
        }
    }
}

impl std::fmt::Display for BrowserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserType::Firefox => f.write_str("firefox"),
            BrowserType::Chrome => f.write_str("chrome"),
        }
    }
}

impl BrowserType {
    /// Get the WebDriver URL for this browser type
    pub fn get_webdriver_url(&self) -> String {
        match self {
            BrowserType::Firefox => "http://localhost:4444".to_string(),
            BrowserType::Chrome => {
                // Try to detect chromedriver port from log files
                for log_file in &["/tmp/chromedriver_new.log", "/tmp/chromedriver.log"] {
                    if let Ok(log) = std::fs::read_to_string(log_file)
                        && let Some(line) = log
                            .lines()
                            .find(|l| l.contains("ChromeDriver was started successfully on port"))
                        && let Some(port) = line
                            .split("port ")
                            .nth(1)
                            .and_then(|s| s.trim_end_matches('.').parse::<u16>().ok())
                    {
                        return format!("http://localhost:{port}");
                    }
                }
                "http://localhost:9515".to_string()
            }
        }
    }

    fn driver_name(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "geckodriver",
            BrowserType::Chrome => "chromedriver",
        }
    }
}

impl Browser {
    /// Connect to a running WebDriver and open a browser session
    ///
    /// # Arguments
    /// * `browser_type` - Firefox or Chrome
    /// * `webdriver_url` - Endpoint override; defaults per browser
    /// * `viewport` - Optional viewport dimensions
    /// * `headless` - Whether to run in headless mode
    pub async fn new(
        browser_type: BrowserType,
        webdriver_url: Option<&str>,
        viewport: Option<ViewportSize>,
        headless: bool,
    ) -> Result<Self> {
        info!("Connecting to {:?} WebDriver", browser_type);

        let webdriver_url = webdriver_url
            .map(str::to_string)
            .unwrap_or_else(|| browser_type.get_webdriver_url());

        if !Self::is_webdriver_running(&webdriver_url).await {
            let driver_name = browser_type.driver_name();
            anyhow::bail!(
                "Cannot connect to {} WebDriver at {}.\n\
                Please ensure {} is running:\n\
                  For Firefox: geckodriver --port 4444\n\
                  For Chrome: chromedriver --port 9515",
                driver_name,
                webdriver_url,
                driver_name
            );
        }

        let mut caps = serde_json::Map::new();

        match &browser_type {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if headless {
                    args.push("--headless".to_string());
                }
                if let Some(vp) = &viewport {
                    args.push(format!("--width={}", vp.width));
                    args.push(format!("--height={}", vp.height));
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
            }
            BrowserType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                if headless {
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                    args.push("--disable-dev-shm-usage".to_string());
                }
                if let Some(vp) = &viewport {
                    args.push(format!("--window-size={},{}", vp.width, vp.height));
                }

                // Chrome refuses to share a profile directory between sessions
                let profile_dir = tempfile::Builder::new()
                    .prefix("retrace-chrome-")
                    .tempdir()?;
                #[allow(deprecated)]
                let profile_path = profile_dir.into_path();
                args.push(format!("--user-data-dir={}", profile_path.display()));

                caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
            }
        }

        debug!("Connecting to WebDriver at {}", webdriver_url);

        let client = ClientBuilder::rustls()
            .capabilities(caps)
            .connect(&webdriver_url)
            .await
            .with_context(|| format!("Failed to connect to WebDriver at {}", webdriver_url))?;

        if let Some(vp) = viewport {
            debug!("Setting viewport to {}x{}", vp.width, vp.height);
            if let Err(e) = client.set_window_size(vp.width, vp.height).await {
                debug!("Note: Could not set window size: {}", e);
            }
        }

        Ok(Browser {
            client,
            browser_type,
        })
    }

    pub fn browser_type(&self) -> BrowserType {
        self.browser_type
    }

    async fn is_webdriver_running(url: &str) -> bool {
        let status_url = format!("{}/status", url);

        match reqwest::get(&status_url).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn script<T: DeserializeOwned>(&self, code: &str, args: Vec<Value>) -> Result<T> {
        let value = self
            .client
            .execute(code, args)
            .await
            .context("Script execution failed")?;
        serde_json::from_value(value).context("Unexpected script result")
    }

    async fn element_script<T: DeserializeOwned>(&self, code: &str, element: &Element) -> Result<T> {
        self.script(code, vec![serde_json::to_value(element)?]).await
    }

    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Page for Browser {
    type Element = Element;

    async fn current_url(&self) -> Result<String> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.client.goto(url).await?;
        self.wait_ready(Duration::from_secs(10)).await
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .script::<bool>("return document.readyState === 'complete';", vec![])
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // The document may be mid-unload
                Err(e) => debug!("Ready check failed: {}", e),
            }
            if Instant::now() >= deadline {
                anyhow::bail!("Page did not finish loading within {:?}", timeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Element>> {
        self.client
            .find_all(Locator::Css(selector))
            .await
            .with_context(|| format!("Query for '{}' failed", selector))
    }

    async fn element_text(&self, element: &Element) -> Result<String> {
        self.element_script("return (arguments[0].textContent || '').trim();", element)
            .await
    }

    async fn element_visible(&self, element: &Element) -> Result<bool> {
        self.element_script(
            r#"
            const el = arguments[0];
            const rect = el.getBoundingClientRect();
            if (rect.width === 0 || rect.height === 0) return false;
            const style = window.getComputedStyle(el);
            return style.display !== 'none' && style.visibility !== 'hidden';
            "#,
            element,
        )
        .await
    }

    async fn element_rect(&self, element: &Element) -> Result<BoundingBox> {
        self.element_script(
            r#"
            const r = arguments[0].getBoundingClientRect();
            return { x: r.left, y: r.top, width: r.width, height: r.height };
            "#,
            element,
        )
        .await
    }

    async fn scroll_into_view(&self, element: &Element) -> Result<()> {
        self.element_script::<Value>(
            "arguments[0].scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' }); return null;",
            element,
        )
        .await?;
        Ok(())
    }

    async fn scroll_position(&self) -> Result<ScrollPosition> {
        self.script("return { x: window.scrollX, y: window.scrollY };", vec![])
            .await
    }

    async fn scroll_to(&self, position: ScrollPosition) -> Result<()> {
        self.script::<Value>(
            "window.scrollTo(arguments[0], arguments[1]); return null;",
            vec![json!(position.x), json!(position.y)],
        )
        .await?;
        Ok(())
    }

    async fn dispatch(&self, element: &Element, interaction: &Interaction) -> Result<()> {
        match interaction {
            Interaction::Click => element.click().await?,
            Interaction::Input { value } => {
                element.clear().await?;
                element.send_keys(value).await?;
            }
            Interaction::Change { value, checked } => {
                self.script::<Value>(
                    r#"
                    const [el, value, checked] = arguments;
                    if (el.type === 'checkbox' || el.type === 'radio') {
                        el.checked = checked === null ? !el.checked : checked;
                    } else {
                        el.value = value;
                    }
                    el.dispatchEvent(new Event('input', { bubbles: true }));
                    el.dispatchEvent(new Event('change', { bubbles: true }));
                    return null;
                    "#,
                    vec![serde_json::to_value(element)?, json!(value), json!(checked)],
                )
                .await?;
            }
            Interaction::Keypress { key } => {
                let keys = match key.as_str() {
                    "Enter" => KEY_ENTER,
                    "Tab" => KEY_TAB,
                    other => other,
                };
                element.send_keys(keys).await?;
            }
        }
        Ok(())
    }

    async fn set_overlays_hidden(&self, hidden: bool) -> Result<()> {
        self.script::<Value>(script::SET_OVERLAYS_HIDDEN, vec![json!(hidden)])
            .await?;
        Ok(())
    }

    async fn capture_viewport(&self) -> Result<Vec<u8>> {
        Ok(self.client.screenshot().await?)
    }

    async fn device_pixel_ratio(&self) -> Result<f64> {
        self.script("return window.devicePixelRatio || 1;", vec![])
            .await
    }

    async fn install_recorder(&self) -> Result<()> {
        self.script::<Value>(script::INSTALL, vec![])
            .await
            .context("Failed to inject the capture script")?;
        Ok(())
    }

    async fn drain_recorder_events(&self) -> Result<Vec<RawEvent>> {
        let raw: Vec<Value> = self.script(script::DRAIN, vec![]).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping malformed capture event: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn uninstall_recorder(&self) -> Result<()> {
        self.script::<Value>(script::UNINSTALL, vec![]).await?;
        Ok(())
    }
}
