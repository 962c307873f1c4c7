//! Runner configuration
//!
//! Layering order: built-in defaults, then the TOML file, then environment
//! (`BASE_URL`, `CI`), then whatever the CLI overrides explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::RetryPolicy;

/// Retries used when `CI` is set and no explicit policy is configured
pub const CI_RETRIES: u32 = 2;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Root of the deployment under test
    pub base_url: String,

    /// Directory containing suite YAML files
    pub suites_dir: PathBuf,

    /// Directory receiving reports and artifacts
    pub output_dir: PathBuf,

    /// Report format written after a run
    pub reporter: ReporterKind,

    /// Running under CI
    pub ci: bool,

    /// Reject suites that contain `only: true` scenarios
    pub forbid_only: bool,

    /// Number of workers; only 1 is supported
    pub workers: usize,

    /// Explicit retry policy; `None` derives it from `ci`
    pub retry: Option<RetryPolicy>,

    pub timeouts: TimeoutConfig,
    pub console: ConsoleConfig,
    pub browser: BrowserConfig,
    pub compare: CompareConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            suites_dir: PathBuf::from("suites"),
            output_dir: PathBuf::from("test-results"),
            reporter: ReporterKind::default(),
            ci: false,
            forbid_only: false,
            workers: 1,
            retry: None,
            timeouts: TimeoutConfig::default(),
            console: ConsoleConfig::default(),
            browser: BrowserConfig::default(),
            compare: CompareConfig::default(),
        }
    }
}

/// Report format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// HTML report plus JSON results
    #[default]
    Html,
    /// JSON results only
    Json,
    /// Terminal listing only
    List,
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Page load (navigation + network idle)
    pub navigation_ms: u64,

    /// Clicks, hovers and other interactions
    pub action_ms: u64,

    /// Polling window for page assertions
    pub expect_ms: u64,

    /// Network must stay idle this long before a page counts as loaded
    pub stability_window_ms: u64,

    /// Direct HTTP requests
    pub http_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            action_ms: 5_000,
            expect_ms: 5_000,
            stability_window_ms: 500,
            http_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn expect(&self) -> Duration {
        Duration::from_millis(self.expect_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn http(&self) -> Duration {
        Duration::from_millis(self.http_ms)
    }
}

/// Console error collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Substrings marking benign console errors
    pub ignore: Vec<String>,

    /// Extra wait after load so delayed errors are caught
    pub settle_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            ignore: vec!["404".to_string(), "favicon".to_string()],
            settle_ms: 1_000,
        }
    }
}

/// Browser engine selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(Error::InvalidConfig(format!("unknown browser '{}'", other))),
        }
    }
}

/// Playwright bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub browser: BrowserKind,
    pub headless: bool,

    /// Node.js executable
    pub node_binary: PathBuf,

    /// Explicit path to the `playwright` package; resolved by Node otherwise
    pub playwright_module: Option<PathBuf>,

    /// Time allowed for the browser to start
    pub launch_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            playwright_module: None,
            launch_timeout_ms: 30_000,
        }
    }
}

/// Production/staging visual comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    pub production_url: String,
    pub staging_url: String,

    /// Allowed differing pixels, in percent
    pub threshold: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            production_url: "https://hub.thegraph.foundation/".to_string(),
            staging_url: "https://staging.hub.thegraph.foundation/".to_string(),
            threshold: 0.5,
        }
    }
}

impl ProbeConfig {
    /// Load configuration from file
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from file and apply process environment overrides
    pub fn from_environment(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `BASE_URL` and `CI` using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup("BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = base_url.trim().to_string();
        }

        if lookup("CI").map(|v| is_truthy(&v)).unwrap_or(false) {
            self.ci = true;
            self.forbid_only = true;
        }
    }

    /// Check settings that would otherwise fail mid-run
    pub fn validate(&self) -> Result<()> {
        if self.workers != 1 {
            return Err(Error::InvalidConfig(format!(
                "workers = {}: scenarios share one browser per run and must execute sequentially",
                self.workers
            )));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if !(0.0..=100.0).contains(&self.compare.threshold) {
            return Err(Error::InvalidConfig(format!(
                "compare.threshold must be within 0-100, got {}",
                self.compare.threshold
            )));
        }
        if self.timeouts.stability_window_ms >= self.timeouts.navigation_ms {
            return Err(Error::InvalidConfig(
                "timeouts.stability_window_ms must be shorter than timeouts.navigation_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy in effect: explicit, else CI default
    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.retry {
            Some(policy) => policy.clone(),
            None if self.ci => RetryPolicy {
                max_retries: CI_RETRIES,
                ..Default::default()
            },
            None => RetryPolicy::none(),
        }
    }

    /// Resolve a route against the base URL; absolute URLs pass through
    pub fn url_for(&self, route: &str) -> String {
        resolve_url(&self.base_url, route)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Join a base URL and a route without doubling or dropping slashes
pub fn resolve_url(base_url: &str, route: &str) -> String {
    if route.starts_with("http://") || route.starts_with("https://") {
        return route.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if route.is_empty() {
        format!("{}/", base)
    } else if route.starts_with('/') {
        format!("{}{}", base, route)
    } else {
        format!("{}/{}", base, route)
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
