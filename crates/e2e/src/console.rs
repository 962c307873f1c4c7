//! Console error filtering

use dashprobe_common::config::ConsoleConfig;

use crate::driver::{ConsoleLevel, ConsoleMessage};

/// Substring ignore list applied to console errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleFilter {
    ignore: Vec<String>,
}

impl ConsoleFilter {
    pub fn new(ignore: Vec<String>) -> Self {
        Self { ignore }
    }

    /// Every error counts
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.ignore.clone())
    }

    pub fn is_ignored(&self, text: &str) -> bool {
        self.ignore.iter().any(|needle| text.contains(needle.as_str()))
    }

    /// Texts of error-level messages not covered by the ignore list
    pub fn errors(&self, messages: &[ConsoleMessage]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| m.level == ConsoleLevel::Error)
            .filter(|m| !self.is_ignored(&m.text))
            .map(|m| match &m.location {
                Some(location) => format!("{} ({})", m.text, location),
                None => m.text.clone(),
            })
            .collect()
    }
}
