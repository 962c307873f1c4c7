//! `dashprobe health`: direct HTTP checks of the deployment's routes

use anyhow::Result;
use clap::Args;
use std::time::Duration;

use dashprobe_common::ProbeConfig;
use dashprobe_e2e::http::RouteHealth;
use dashprobe_e2e::HttpProbe;

use crate::output::{print_error, print_list, print_success, status_cell, OutputFormat, TableDisplay};

const DEFAULT_ROUTES: [&str; 4] = ["/", "/goose/", "/reo/", "/health"];

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Route to check (repeatable); defaults to the hub, dashboards and /health
    #[arg(short, long)]
    pub route: Vec<String>,

    /// Wait up to this many seconds for /health before checking
    #[arg(long)]
    pub wait: Option<u64>,
}

impl TableDisplay for RouteHealth {
    fn headers() -> Vec<&'static str> {
        vec!["Route", "URL", "Status", "Time", "Health"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.route.clone(),
            self.url.clone(),
            self.status
                .map(|s| s.to_string())
                .or_else(|| self.error.clone())
                .unwrap_or_default(),
            format!("{} ms", self.elapsed_ms),
            status_cell(if self.healthy { "healthy" } else { "unhealthy" }),
        ]
    }
}

pub async fn execute(args: HealthArgs, config: &ProbeConfig, format: OutputFormat) -> Result<bool> {
    let probe = HttpProbe::new(config.base_url.clone(), config.timeouts.http())?;

    if let Some(seconds) = args.wait {
        probe
            .wait_until_healthy("/health", Duration::from_secs(seconds))
            .await?;
    }

    let routes: Vec<String> = if args.route.is_empty() {
        DEFAULT_ROUTES.iter().map(|r| r.to_string()).collect()
    } else {
        args.route
    };

    let report = probe.sweep(&routes).await;
    print_list(&report, format);

    let unhealthy = report.iter().filter(|r| !r.healthy).count();
    if unhealthy == 0 {
        print_success(&format!("{} route(s) healthy at {}", report.len(), config.base_url));
        Ok(true)
    } else {
        print_error(&format!("{} of {} route(s) unhealthy", unhealthy, report.len()));
        Ok(false)
    }
}
