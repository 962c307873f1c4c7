//! `dashprobe compare`: production vs staging render comparison

use anyhow::{Context, Result};
use clap::Args;

use dashprobe_common::ProbeConfig;
use dashprobe_e2e::compare::MetricDifference;
use dashprobe_e2e::Comparer;

use crate::output::{
    print_document, print_error, print_info, print_list, print_success, OutputFormat,
    TableDisplay,
};

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Production URL
    #[arg(long)]
    pub production: Option<String>,

    /// Staging URL
    #[arg(long)]
    pub staging: Option<String>,

    /// Allowed differing pixels, in percent
    #[arg(long)]
    pub threshold: Option<f64>,
}

impl TableDisplay for MetricDifference {
    fn headers() -> Vec<&'static str> {
        vec!["Metric", "Production", "Staging"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.metric.clone(),
            self.production.clone(),
            self.staging.clone(),
        ]
    }
}

pub async fn execute(args: CompareArgs, mut config: ProbeConfig, format: OutputFormat) -> Result<bool> {
    if let Some(production) = args.production {
        config.compare.production_url = production;
    }
    if let Some(staging) = args.staging {
        config.compare.staging_url = staging;
    }
    if let Some(threshold) = args.threshold {
        config.compare.threshold = threshold;
    }
    config.validate()?;

    let driver = super::playwright_driver(&config)?;
    let output_dir = config.output_dir.join("compare");
    let comparer = Comparer::new(
        driver,
        config.compare.clone(),
        config.timeouts.clone(),
        output_dir.clone(),
    );

    let report = comparer.compare().await.context("comparison failed")?;
    let report_path = output_dir.join("compare-report.json");
    report.write_json(&report_path)?;

    if !print_document(&report, format) {
        if report.differences.is_empty() {
            print_info("No metric differences");
        } else {
            print_list(&report.differences, format);
        }
        if let Some(diff) = &report.visual.diff_image_path {
            print_info(&format!("Diff image: {}", diff.display()));
        }
        print_info(&format!("Report: {}", report_path.display()));
    }

    let summary = format!(
        "{:.2}% of pixels differ (threshold {:.2}%), {} metric difference(s)",
        report.visual.diff_percent,
        report.threshold,
        report.differences.len()
    );
    if report.passed() {
        print_success(&summary);
    } else {
        print_error(&summary);
    }
    Ok(report.passed())
}
