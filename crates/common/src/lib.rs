//! dashprobe Common Library
//!
//! Configuration, logging and small shared types used by the runner
//! library and the CLI.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{ProbeConfig, ReporterKind};
pub use error::{Error, Result};
pub use types::{Backoff, RetryPolicy, Viewport};

/// dashprobe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "dashprobe.toml";

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "DASHPROBE_CONFIG";

/// Default config path: `$DASHPROBE_CONFIG`, else `./dashprobe.toml`
pub fn default_config_path() -> std::path::PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_CONFIG_FILE))
}
