//! Error types for E2E runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Navigation to {url} did not settle within {timeout_ms} ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("{assertion}: expected {expected}, got {actual}")]
    AssertionFailure {
        assertion: String,
        expected: String,
        actual: String,
    },

    #[error("GET {url} returned {actual}, expected {expected}")]
    HttpStatusMismatch {
        url: String,
        expected: u16,
        actual: u16,
    },

    #[error("Node.js not found at '{0}'. Install Node.js or set browser.node_binary")]
    NodeNotFound(String),

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Bridge protocol error: {0}")]
    Protocol(String),

    #[error("Browser session closed")]
    SessionClosed,

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Scenarios marked `only` are forbidden in CI: {}", .0.join(", "))]
    OnlyForbidden(Vec<String>),

    #[error("Screenshot mismatch: {name} differs by {diff_percent:.2}% (threshold: {threshold:.2}%)")]
    ScreenshotMismatch {
        name: String,
        diff_percent: f64,
        threshold: f64,
    },

    #[error("Visual comparison: {0}")]
    Visual(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(#[from] dashprobe_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type E2eResult<T> = Result<T, E2eError>;

impl E2eError {
    /// Build an assertion failure from displayable parts
    pub fn assertion(
        assertion: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        E2eError::AssertionFailure {
            assertion: assertion.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Short machine-readable kind used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            E2eError::NavigationTimeout { .. } => "navigation_timeout",
            E2eError::AssertionFailure { .. } => "assertion_failure",
            E2eError::HttpStatusMismatch { .. } => "http_status_mismatch",
            E2eError::Timeout(_) => "timeout",
            E2eError::ScreenshotMismatch { .. } => "screenshot_mismatch",
            E2eError::NodeNotFound(_)
            | E2eError::Playwright(_)
            | E2eError::Protocol(_)
            | E2eError::SessionClosed => "driver",
            _ => "error",
        }
    }

    /// Whether the page was checked and found wanting, as opposed to the run breaking
    pub fn is_check_failure(&self) -> bool {
        matches!(
            self,
            E2eError::AssertionFailure { .. }
                | E2eError::HttpStatusMismatch { .. }
                | E2eError::NavigationTimeout { .. }
                | E2eError::Timeout(_)
        )
    }

    /// Expected/actual pair for assertion-like failures
    pub fn expected_actual(&self) -> Option<(String, String)> {
        match self {
            E2eError::AssertionFailure {
                expected, actual, ..
            } => Some((expected.clone(), actual.clone())),
            E2eError::HttpStatusMismatch {
                expected, actual, ..
            } => Some((expected.to_string(), actual.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_failures_are_told_apart_from_breakage() {
        assert!(E2eError::assertion("title", "GOOSE", "'REO'").is_check_failure());
        assert!(E2eError::Timeout("clickable a".into()).is_check_failure());
        assert!(E2eError::NavigationTimeout {
            url: "http://localhost/reo".into(),
            timeout_ms: 5000,
        }
        .is_check_failure());

        assert!(!E2eError::Playwright("bridge exited".into()).is_check_failure());
        assert!(!E2eError::SessionClosed.is_check_failure());
        assert!(!E2eError::Protocol("garbage".into()).is_check_failure());
    }
}
