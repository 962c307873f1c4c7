//! `dashprobe list`: show the scenarios a run would execute

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use dashprobe_common::ProbeConfig;
use dashprobe_e2e::{Scenario, Selection, Suite};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory containing suite YAML files
    #[arg(long)]
    pub suites: Option<PathBuf>,

    /// Only scenarios carrying this tag
    #[arg(short, long)]
    pub tag: Vec<String>,

    /// Only scenarios whose name contains this text
    #[arg(short, long)]
    pub name: Option<String>,
}

#[derive(Serialize)]
struct ScenarioInfo {
    suite: String,
    name: String,
    tags: Vec<String>,
    steps: usize,
    skip: bool,
}

impl From<&Scenario> for ScenarioInfo {
    fn from(scenario: &Scenario) -> Self {
        Self {
            suite: scenario.suite.clone(),
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            steps: scenario.steps.len(),
            skip: scenario.skip,
        }
    }
}

impl TableDisplay for ScenarioInfo {
    fn headers() -> Vec<&'static str> {
        vec!["Suite", "Scenario", "Tags", "Steps", "Skip"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.suite.clone(),
            self.name.clone(),
            self.tags.join(", "),
            self.steps.to_string(),
            if self.skip { "yes".to_string() } else { String::new() },
        ]
    }
}

pub fn execute(args: ListArgs, config: &ProbeConfig, format: OutputFormat) -> Result<bool> {
    let dir = args.suites.unwrap_or_else(|| config.suites_dir.clone());
    let suites = Suite::load_all(&dir)?;
    let selection = Selection {
        tags: args.tag,
        name: args.name,
        forbid_only: config.forbid_only,
    };
    let scenarios = selection.apply(&suites)?;
    let rows: Vec<ScenarioInfo> = scenarios.iter().map(ScenarioInfo::from).collect();
    print_list(&rows, format);
    Ok(true)
}
