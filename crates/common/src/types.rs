//! Core types shared between the runner and the CLI

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Browser viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Desktop Chrome default
    pub const DESKTOP: Viewport = Viewport {
        width: 1280,
        height: 720,
    };

    /// Phone-sized viewport used by the responsiveness checks
    pub const MOBILE: Viewport = Viewport {
        width: 375,
        height: 667,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::DESKTOP
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Delay strategy between scenario attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,
    /// Wait the same amount before every retry
    Fixed { delay_ms: u64 },
    /// `initial_ms * factor^(retry - 1)`, capped at `max_ms`
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default = "default_factor")]
        factor: u32,
    },
}

fn default_factor() -> u32 {
    2
}

impl Backoff {
    /// Delay before the given retry (1 = first retry)
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                initial_ms,
                max_ms,
                factor,
            } => {
                let exponent = retry.saturating_sub(1);
                let multiplier = u64::from(*factor).saturating_pow(exponent);
                Duration::from_millis(initial_ms.saturating_mul(multiplier).min(*max_ms))
            }
        }
    }
}

/// Bounded retry policy applied to whole scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_retries(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Total number of attempts, including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before `attempt` (1-based); the first attempt never waits
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.backoff.delay(attempt - 1)
        }
    }
}
