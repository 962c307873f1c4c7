//! Browser engine seam
//!
//! [`Driver`] launches isolated sessions; a [`BrowserSession`] owns one
//! browser context (cookie jar, pages) and is closed by its owner. All
//! methods take `&self` so several pages of one session can be driven
//! concurrently.

pub mod playwright;
pub mod protocol;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use dashprobe_common::Viewport;

use crate::error::E2eResult;

pub use playwright::{PlaywrightConfig, PlaywrightDriver};

/// Page handle within a session
pub type PageId = u32;

/// Load state a navigation waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    /// No network activity for the stability window
    #[default]
    NetworkIdle,
}

/// Element target: CSS (or engine) selector with optional text filter and index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<usize>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            has_text: None,
            nth: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.has_text = Some(text.into());
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.nth = Some(index);
        self
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector)?;
        if let Some(text) = &self.has_text {
            write!(f, " (has text '{}')", text)?;
        }
        if let Some(n) = self.nth {
            write!(f, " [{}]", n)?;
        }
        Ok(())
    }
}

/// Result of a navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    /// Final URL after redirects
    pub url: String,
    /// Status of the main document response, if there was one
    pub status: Option<u16>,
}

/// State of one matched element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub text: String,
    pub visible: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Requested computed style properties
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
}

/// Console message severity as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Error,
    Warning,
    Info,
    Log,
    Debug,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl ConsoleMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: ConsoleLevel::Error,
            text: text.into(),
            location: None,
        }
    }
}

/// Cookie metadata; values are never read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// Per-session launch settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub viewport: Viewport,
    /// Stability window appended to network-idle waits
    pub stability_window: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::DESKTOP,
            stability_window: Duration::from_millis(500),
        }
    }
}

/// Launches isolated browser sessions
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Start a fresh session with one open page (the main page)
    async fn launch(&self, options: &LaunchOptions) -> E2eResult<Box<dyn BrowserSession>>;
}

/// One isolated browser context
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Page opened at launch
    fn main_page(&self) -> PageId;

    async fn new_page(&self) -> E2eResult<PageId>;

    async fn close_page(&self, page: PageId) -> E2eResult<()>;

    async fn goto(
        &self,
        page: PageId,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> E2eResult<Navigation>;

    /// Wait for the page to reach the load state again
    async fn wait_for_load(
        &self,
        page: PageId,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> E2eResult<()>;

    async fn go_back(&self, page: PageId, timeout: Duration) -> E2eResult<Navigation>;

    async fn go_forward(&self, page: PageId, timeout: Duration) -> E2eResult<Navigation>;

    async fn reload(&self, page: PageId, timeout: Duration) -> E2eResult<Navigation>;

    async fn click(&self, page: PageId, target: &Locator, timeout: Duration) -> E2eResult<()>;

    async fn hover(&self, page: PageId, target: &Locator, timeout: Duration) -> E2eResult<()>;

    async fn set_viewport(&self, page: PageId, viewport: Viewport) -> E2eResult<()>;

    async fn url(&self, page: PageId) -> E2eResult<String>;

    async fn title(&self, page: PageId) -> E2eResult<String>;

    /// Serialized DOM
    async fn content(&self, page: PageId) -> E2eResult<String>;

    /// Snapshot every element matching `target`, reading the given computed styles
    async fn query(
        &self,
        page: PageId,
        target: &Locator,
        styles: &[String],
    ) -> E2eResult<Vec<ElementSnapshot>>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&self, page: PageId, expression: &str) -> E2eResult<serde_json::Value>;

    /// Console messages recorded since the page was opened
    async fn console(&self, page: PageId) -> E2eResult<Vec<ConsoleMessage>>;

    async fn cookies(&self) -> E2eResult<Vec<Cookie>>;

    /// Write a PNG screenshot to `path`
    async fn screenshot(&self, page: PageId, path: &Path, full_page: bool) -> E2eResult<()>;

    /// Close the browser; calling it again is a no-op
    async fn close(&self) -> E2eResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display() {
        let target = Locator::css("a").with_text("Grumpy Goose").nth(1);
        assert_eq!(target.to_string(), "a (has text 'Grumpy Goose') [1]");
        assert_eq!(Locator::css("h1").to_string(), "h1");
    }

    #[test]
    fn test_locator_serialization_omits_empty_filters() {
        let json = serde_json::to_value(Locator::css(".donut-svg")).unwrap();
        assert_eq!(json, serde_json::json!({ "selector": ".donut-svg" }));
    }

    #[test]
    fn test_unknown_console_level() {
        let message: ConsoleMessage =
            serde_json::from_str(r#"{"level":"dir","text":"x"}"#).unwrap();
        assert_eq!(message.level, ConsoleLevel::Other);

        let message: ConsoleMessage =
            serde_json::from_str(r#"{"level":"error","text":"boom","location":null}"#).unwrap();
        assert_eq!(message, ConsoleMessage::error("boom"));
    }
}
