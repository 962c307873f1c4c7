//! CLI Commands

pub mod compare;
pub mod health;
pub mod list;
pub mod run;

use std::sync::Arc;

use anyhow::{Context, Result};
use dashprobe_common::ProbeConfig;
use dashprobe_e2e::driver::{Driver, PlaywrightConfig, PlaywrightDriver};

/// Playwright driver for the configured browser
pub fn playwright_driver(config: &ProbeConfig) -> Result<Arc<dyn Driver>> {
    let driver = PlaywrightDriver::new(PlaywrightConfig::from(&config.browser))
        .context("cannot start the Playwright bridge")?;
    Ok(Arc::new(driver))
}
