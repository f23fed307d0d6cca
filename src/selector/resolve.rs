use std::time::Instant;
use tracing::{debug, info, warn};

use super::is_valid;
use crate::config::ResolverConfig;
use crate::errors::ReplayError;
use crate::page::{Page, matching};

/// Re-finds recorded elements at replay time
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `selector` to a visible element.
    ///
    /// With a non-empty `expected_text`, only elements whose trimmed text equals
    /// it count as matches; a selector that matches but with different text is
    /// reported as not found. Among several matches the first in document order
    /// wins.
    pub async fn resolve<P: Page + ?Sized>(
        &self,
        page: &P,
        selector: &str,
        expected_text: Option<&str>,
    ) -> Result<P::Element, ReplayError> {
        if !is_valid(selector) {
            return Err(ReplayError::InvalidSelector(selector.to_string()));
        }

        let expected_text = expected_text.filter(|t| !t.is_empty());
        let not_found = || ReplayError::ElementNotFound {
            selector: selector.to_string(),
            expected_text: expected_text.map(str::to_string),
        };

        let attempts = self.config.attempts.max(1);
        let mut element = None;
        for attempt in 1..=attempts {
            match matching(page, selector, expected_text).await {
                Ok(mut found) if !found.is_empty() => {
                    if found.len() > 1 {
                        debug!(
                            "{} elements match '{}', using the first",
                            found.len(),
                            selector
                        );
                    }
                    element = Some(found.swap_remove(0));
                    break;
                }
                Ok(_) => debug!(
                    "Attempt {}/{}: no match for '{}'",
                    attempt, attempts, selector
                ),
                Err(e) => warn!(
                    "Attempt {}/{}: query for '{}' failed: {}",
                    attempt, attempts, selector, e
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        let element = element.ok_or_else(not_found)?;

        if !self.wait_visible(page, &element).await {
            info!("Element '{}' never became visible", selector);
            return Err(not_found());
        }

        Ok(element)
    }

    async fn wait_visible<P: Page + ?Sized>(&self, page: &P, element: &P::Element) -> bool {
        let deadline = Instant::now() + self.config.visibility_timeout();
        loop {
            match page.element_visible(element).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!("Visibility check failed: {}", e),
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.visibility_poll()).await;
        }
    }
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod resolve_test;
