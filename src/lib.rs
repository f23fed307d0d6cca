//! # retrace
#![allow(clippy::uninlined_format_args)]
//!
//! Record user interactions on a live page and replay them later as end-to-end
//! UI tests, with pixel-level visual regression checks.
//!
//! A recording becomes a [`StepSequence`]: each step is a selector, an action,
//! the text or value it expects, and optionally a baseline screenshot. Replay
//! re-finds every target (retrying while the page renders), dispatches the
//! action, compares any baseline and reports a single pass/fail summary. Runs
//! survive page navigations by persisting their progress and resuming on the
//! next page.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Start the daemon; it owns the browser tabs
//! retrace daemon start --browser chrome
//!
//! # Record a test, adding a visual checkpoint along the way
//! retrace record start login --url "https://app.example.com/login"
//! retrace record screenshot
//! retrace record stop
//!
//! # Replay it; exits non-zero with the failing step on error
//! retrace replay login
//! retrace replay login --format json | jq '.executedSteps'
//!
//! # Fire and forget, then follow the events
//! EXEC=$(retrace replay login --no-wait)
//! retrace events "$EXEC"
//! retrace stop "$EXEC"
//!
//! # Manage tests and settings
//! retrace tests list
//! retrace tests export -o tests.json
//! retrace settings --replay-delay 250
//!
//! # Compare two screenshots offline
//! retrace diff baseline.png current.png --output diff.png
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | General error |
//! | 2 | Invalid selector |
//! | 3 | Element not found |
//! | 4 | Action dispatch failed |
//! | 5 | Visual regression |
//! | 6 | Tab already running a replay |
//! | 7 | Visual comparison failed |
//! | 8 | Daemon unavailable |
//! | 9 | WebDriver connection failed |
//! | 10 | Timeout |
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use retrace::{Browser, BrowserType, ReplayEngine, SessionRegistry, Store, StepSequence};
//! use retrace::store::{FileStore, TestLibrary};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let browser = Arc::new(Browser::new(BrowserType::Chrome, None, None, true).await?);
//! let store: Arc<dyn Store> = Arc::new(FileStore::open_default()?);
//! let test: StepSequence = TestLibrary::new(&*store)
//!     .get("login")?
//!     .ok_or_else(|| anyhow::anyhow!("no such test"))?;
//!
//! let engine = ReplayEngine::new(browser, store, Arc::new(SessionRegistry::new()));
//! let outcome = engine.replay_test(test, "main", "run-1").await?;
//! println!("{:?}", outcome.outcome.summary());
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod daemon;
pub mod errors;

/// Persisted replay progress and the per-tab run registry
pub mod execution;

/// The page seam the recorder and the replay engine drive
pub mod page;

pub mod recorder;
pub mod replay;

/// Selector generation at recording time and resolution at replay time
pub mod selector;

pub mod step;
pub mod store;
pub mod tab_manager;
pub mod types;
pub mod visual;

/// WebDriver browser control
pub mod webdriver;

pub use errors::ReplayError;
pub use execution::{ExecutionState, SessionRegistry};
pub use page::Page;
pub use replay::{ReplayEngine, ReplayEvent, ReplayOutcome, ReplayStatus, RunOutcome};
pub use step::{Action, Step, StepSequence};
pub use store::Store;
pub use types::{BoundingBox, OutputFormat, ScrollPosition, ViewportSize};
pub use visual::VisualDiff;
pub use webdriver::{Browser, BrowserType};
