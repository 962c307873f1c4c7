//! Tracing subscriber setup shared by the CLI and test harnesses

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Install the global subscriber
///
/// `RUST_LOG` wins when set; otherwise `debug` with `verbose`, else `info`.
/// Calling this twice is harmless (the second install is ignored).
pub fn init(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let result = match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).compact())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
