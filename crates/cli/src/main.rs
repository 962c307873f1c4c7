//! dashprobe CLI - Main Entry Point
//!
//! Runs scenario suites against a deployed dashboard hub, checks route
//! health and compares production with staging.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod output;

use commands::{compare, health, list, run};
use dashprobe_common::logging::{self, LogFormat};
use dashprobe_common::ProbeConfig;

/// dashprobe - end-to-end checks for deployed dashboards
#[derive(Parser)]
#[command(name = "dashprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: $DASHPROBE_CONFIG or ./dashprobe.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root URL of the deployment under test
    #[arg(long, env = "BASE_URL", global = true)]
    base_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenario suites in a real browser
    Run(run::RunArgs),

    /// Check HTTP status of the deployment's routes
    Health(health::HealthArgs),

    /// Compare production and staging renders
    Compare(compare::CompareArgs),

    /// List the scenarios a run would execute
    List(list::ListArgs),
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ProbeConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(dashprobe_common::default_config_path);
        let mut config = ProbeConfig::from_environment(&path)?;
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.trim().to_string();
        }
        config.validate()?;
        Ok(config)
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    let config = cli.load_config()?;
    tracing::debug!("Base URL: {}", config.base_url);

    match cli.command {
        Commands::Run(args) => run::execute(args, config, cli.format).await,
        Commands::Health(args) => health::execute(args, &config, cli.format).await,
        Commands::Compare(args) => compare::execute(args, config, cli.format).await,
        Commands::List(args) => list::execute(args, &config, cli.format),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    logging::init(cli.verbose, log_format);

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
