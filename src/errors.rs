use thiserror::Error;

/// Error type surfaced by the replay engine and the CLI, with exit codes
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Selector string is not a valid CSS selector (exit code 2)
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// No element matched after retries and text filtering (exit code 3)
    #[error("No elements found matching selector: {selector}{}", text_suffix(.expected_text))]
    ElementNotFound {
        selector: String,
        expected_text: Option<String>,
    },

    /// Element was resolved but the action threw (exit code 4)
    #[error("Failed to dispatch {action} on '{selector}': {message}")]
    ActionDispatch {
        action: String,
        selector: String,
        message: String,
    },

    /// A visual checkpoint exceeded the threshold and was rejected (exit code 5)
    #[error("Visual regression: {difference_percentage:.2}% of pixels differ from the baseline")]
    VisualRegression {
        step_index: usize,
        difference_percentage: f64,
    },

    /// Another replay already owns the tab (exit code 6)
    #[error("A replay is already running in tab '{0}'")]
    AlreadyRunning(String),

    /// Image decode or comparison failure (exit code 7)
    #[error("Visual comparison failed: {0}")]
    VisualComparison(String),

    /// Daemon channel unavailable (exit code 8)
    #[error("Transport error: {0}")]
    Transport(String),

    /// WebDriver connection failed (exit code 9)
    #[error("WebDriver connection failed: {0}")]
    WebDriver(String),

    /// Operation timeout (exit code 10)
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Failure reported by the daemon, with the exit code it assigned
    #[error("{message}")]
    Daemon {
        kind: String,
        message: String,
        exit_code: i32,
    },

    /// Generic error (exit code 1)
    #[error(transparent)]
    Other(anyhow::Error),
}

fn text_suffix(expected_text: &Option<String>) -> String {
    match expected_text {
        Some(text) if !text.is_empty() => format!(" with text '{}'", text),
        _ => String::new(),
    }
}

impl ReplayError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReplayError::InvalidSelector(_) => 2,
            ReplayError::ElementNotFound { .. } => 3,
            ReplayError::ActionDispatch { .. } => 4,
            ReplayError::VisualRegression { .. } => 5,
            ReplayError::AlreadyRunning(_) => 6,
            ReplayError::VisualComparison(_) => 7,
            ReplayError::Transport(_) => 8,
            ReplayError::WebDriver(_) => 9,
            ReplayError::Timeout(_) => 10,
            ReplayError::Daemon { exit_code, .. } => *exit_code,
            ReplayError::Other(_) => 1,
        }
    }

    /// Short machine-readable name used in failure reports
    pub fn kind(&self) -> &str {
        match self {
            ReplayError::InvalidSelector(_) => "InvalidSelectorError",
            ReplayError::ElementNotFound { .. } => "ElementNotFoundError",
            ReplayError::ActionDispatch { .. } => "ActionDispatchError",
            ReplayError::VisualRegression { .. } => "VisualRegressionError",
            ReplayError::AlreadyRunning(_) => "AlreadyRunningError",
            ReplayError::VisualComparison(_) => "VisualComparisonError",
            ReplayError::Transport(_) => "TransportError",
            ReplayError::WebDriver(_) => "WebDriverError",
            ReplayError::Timeout(_) => "TimeoutError",
            ReplayError::Daemon { kind, .. } => kind,
            ReplayError::Other(_) => "Error",
        }
    }
}

impl From<anyhow::Error> for ReplayError {
    fn from(err: anyhow::Error) -> Self {
        // Errors raised as ReplayError and wrapped in context keep their variant
        let err = match err.downcast::<ReplayError>() {
            Ok(replay_err) => return replay_err,
            Err(err) => err,
        };

        let msg = err.to_string();
        if msg.contains("Failed to connect to daemon") || msg.contains("Daemon closed connection")
        {
            ReplayError::Transport(msg)
        } else if msg.contains("Failed to connect to WebDriver")
            || msg.contains("WebDriver")
            || msg.contains("geckodriver")
            || msg.contains("chromedriver")
        {
            ReplayError::WebDriver(msg)
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ReplayError::Timeout(msg)
        } else {
            ReplayError::Other(err)
        }
    }
}

#[cfg(test)]
#[path = "errors_test.rs"]
mod errors_test;
