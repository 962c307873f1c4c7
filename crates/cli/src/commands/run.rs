//! `dashprobe run`: execute scenario suites

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use dashprobe_common::{ProbeConfig, ReporterKind, RetryPolicy};
use dashprobe_e2e::report::ScenarioResult;
use dashprobe_e2e::{RunnerConfig, Selection, TestRunner, TestSuiteResult};

use crate::output::{
    print_document, print_error, print_info, print_list, print_success, print_warning,
    status_cell, OutputFormat, TableDisplay,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReporterArg {
    Html,
    Json,
    List,
}

impl From<ReporterArg> for ReporterKind {
    fn from(arg: ReporterArg) -> Self {
        match arg {
            ReporterArg::Html => ReporterKind::Html,
            ReporterArg::Json => ReporterKind::Json,
            ReporterArg::List => ReporterKind::List,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory containing suite YAML files
    #[arg(long)]
    pub suites: Option<PathBuf>,

    /// Only scenarios carrying this tag (repeatable, all must match)
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Only scenarios whose "suite › name" contains this text
    #[arg(short, long)]
    pub name: Option<String>,

    /// Retries per failing scenario (overrides config and CI default)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Report format
    #[arg(long, value_enum)]
    pub reporter: Option<ReporterArg>,

    /// Output directory for reports and artifacts
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

impl RunArgs {
    /// Fold flags into the loaded configuration
    pub fn apply(&self, config: &mut ProbeConfig) {
        if let Some(suites) = &self.suites {
            config.suites_dir = suites.clone();
        }
        if let Some(retries) = self.retries {
            let backoff = config.retry_policy().backoff;
            config.retry = Some(RetryPolicy::with_retries(retries, backoff));
        }
        if let Some(reporter) = self.reporter {
            config.reporter = reporter.into();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if self.headed {
            config.browser.headless = false;
        }
    }

    fn selection(&self, config: &ProbeConfig) -> Selection {
        Selection {
            tags: self.tag.clone(),
            name: self.name.clone(),
            forbid_only: config.forbid_only,
        }
    }
}

#[derive(Serialize)]
struct ScenarioRow {
    suite: String,
    scenario: String,
    status: String,
    attempts: usize,
    duration_ms: u64,
    error: Option<String>,
}

impl From<&ScenarioResult> for ScenarioRow {
    fn from(result: &ScenarioResult) -> Self {
        Self {
            suite: result.suite.clone(),
            scenario: result.name.clone(),
            status: result.status.as_str().to_string(),
            attempts: result.attempts.len(),
            duration_ms: result.duration_ms,
            error: result.failure().map(|f| f.message.clone()),
        }
    }
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["Suite", "Scenario", "Status", "Attempts", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.suite.clone(),
            self.scenario.clone(),
            status_cell(&self.status),
            self.attempts.to_string(),
            format!("{} ms", self.duration_ms),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

/// Returns whether every selected scenario passed
pub async fn execute(args: RunArgs, mut config: ProbeConfig, format: OutputFormat) -> Result<bool> {
    args.apply(&mut config);
    config.validate()?;

    let driver = super::playwright_driver(&config)?;
    let runner = TestRunner::new(driver, RunnerConfig::from(&config))?;
    info!(
        "Suites: {} | Output: {}",
        config.suites_dir.display(),
        config.output_dir.display()
    );

    let results = runner
        .run_all(&args.selection(&config))
        .await
        .with_context(|| format!("cannot run suites in {}", config.suites_dir.display()))?;

    let paths = runner.write_results(&results)?;
    report(&results, format);

    print_info(&format!("Results: {}", paths.json.display()));
    if let Some(html) = &paths.html {
        print_info(&format!("Report: {}", html.display()));
    }

    Ok(results.success())
}

fn report(results: &TestSuiteResult, format: OutputFormat) {
    if print_document(results, format) {
        return;
    }

    let rows: Vec<ScenarioRow> = results.results.iter().map(ScenarioRow::from).collect();
    print_list(&rows, format);

    let summary = format!(
        "{} passed, {} flaky, {} failed, {} skipped in {:.1}s",
        results.passed,
        results.flaky,
        results.failed,
        results.skipped,
        results.duration_ms as f64 / 1000.0
    );
    if results.failed > 0 {
        print_error(&summary);
    } else if results.flaky > 0 {
        print_warning(&summary);
    } else {
        print_success(&summary);
    }
}
