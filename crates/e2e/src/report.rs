//! Run results and report artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use dashprobe_common::ReporterKind;

use crate::error::{E2eError, E2eResult};

/// Result of executing one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Why an attempt failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: String,
    /// Failing step, if the failure happened inside one
    pub step: Option<String>,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl FailureDetail {
    pub fn from_error(step: Option<String>, error: &E2eError) -> Self {
        let (expected, actual) = match error.expected_actual() {
            Some((expected, actual)) => (Some(expected), Some(actual)),
            None => (None, None),
        };
        Self {
            kind: error.kind().to_string(),
            step,
            message: error.to_string(),
            expected,
            actual,
        }
    }
}

/// One run of a scenario in its own session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    /// 1-based
    pub attempt: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub failure: Option<FailureDetail>,
    pub screenshot: Option<PathBuf>,
    pub trace: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    /// Failed at least once, then passed on a retry
    Flaky,
    Failed,
    Skipped,
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioStatus::Passed => "passed",
            ScenarioStatus::Flaky => "flaky",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Skipped => "skipped",
        }
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub suite: String,
    pub name: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub attempts: Vec<AttemptResult>,
}

impl ScenarioResult {
    pub fn skipped(suite: &str, name: &str) -> Self {
        Self {
            suite: suite.to_string(),
            name: name.to_string(),
            status: ScenarioStatus::Skipped,
            duration_ms: 0,
            attempts: Vec::new(),
        }
    }

    /// Failure of the last attempt
    pub fn failure(&self) -> Option<&FailureDetail> {
        self.attempts.last().and_then(|a| a.failure.as_ref())
    }

    /// Screenshot taken on the last failing attempt
    pub fn screenshot(&self) -> Option<&Path> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.screenshot.as_deref())
    }

    pub fn trace(&self) -> Option<&Path> {
        self.attempts.iter().find_map(|a| a.trace.as_deref())
    }
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub base_url: String,
    pub total: usize,
    pub passed: usize,
    pub flaky: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl TestSuiteResult {
    pub fn new(
        started_at: DateTime<Utc>,
        base_url: &str,
        duration_ms: u64,
        results: Vec<ScenarioResult>,
    ) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            started_at,
            base_url: base_url.to_string(),
            total: results.len(),
            passed: count(ScenarioStatus::Passed),
            flaky: count(ScenarioStatus::Flaky),
            failed: count(ScenarioStatus::Failed),
            skipped: count(ScenarioStatus::Skipped),
            duration_ms,
            results,
        }
    }

    /// Flaky scenarios count as passed
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn load(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Written report files
#[derive(Debug, Clone, Default)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub html: Option<PathBuf>,
}

/// Write `test-results.json`, plus `report/index.html` for the HTML reporter
pub fn write_reports(
    results: &TestSuiteResult,
    reporter: ReporterKind,
    output_dir: &Path,
) -> E2eResult<ReportPaths> {
    std::fs::create_dir_all(output_dir)?;

    let json = output_dir.join("test-results.json");
    std::fs::write(&json, serde_json::to_string_pretty(results)?)?;
    info!("Results written to: {}", json.display());

    let html = match reporter {
        ReporterKind::Html => {
            let dir = output_dir.join("report");
            std::fs::create_dir_all(&dir)?;
            let path = dir.join("index.html");
            std::fs::write(&path, render_html(results, output_dir))?;
            info!("HTML report written to: {}", path.display());
            Some(path)
        }
        ReporterKind::Json | ReporterKind::List => None,
    };

    Ok(ReportPaths { json, html })
}

/// Self-contained HTML report; artifact links are relative to `report/`
pub fn render_html(results: &TestSuiteResult, output_dir: &Path) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>dashprobe report</title>
<style>
body {{ font-family: system-ui, sans-serif; margin: 2rem; color: #1f2937; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ text-align: left; padding: .4rem .6rem; border-bottom: 1px solid #e5e7eb; vertical-align: top; }}
.passed {{ color: #059669; }} .flaky {{ color: #d97706; }} .failed {{ color: #dc2626; }} .skipped {{ color: #6b7280; }}
pre {{ white-space: pre-wrap; margin: 0; }}
</style>
</head>
<body>
<h1>dashprobe report</h1>
<p>{base} &middot; started {started} &middot; {duration} ms</p>
<p><span class="passed">{passed} passed</span> &middot; <span class="flaky">{flaky} flaky</span> &middot; <span class="failed">{failed} failed</span> &middot; <span class="skipped">{skipped} skipped</span></p>
<table>
<thead><tr><th>Suite</th><th>Scenario</th><th>Status</th><th>Attempts</th><th>Duration</th><th>Details</th></tr></thead>
<tbody>
"#,
        base = escape(&results.base_url),
        started = results.started_at.to_rfc3339(),
        duration = results.duration_ms,
        passed = results.passed,
        flaky = results.flaky,
        failed = results.failed,
        skipped = results.skipped,
    );

    for result in &results.results {
        let mut details = String::new();
        if let Some(failure) = result.failure() {
            if let Some(step) = &failure.step {
                let _ = write!(details, "<p><b>Step:</b> {}</p>", escape(step));
            }
            let _ = write!(details, "<pre>{}</pre>", escape(&failure.message));
            if let (Some(expected), Some(actual)) = (&failure.expected, &failure.actual) {
                let _ = write!(
                    details,
                    "<p><b>Expected:</b> {}<br><b>Actual:</b> {}</p>",
                    escape(expected),
                    escape(actual)
                );
            }
        }
        if let Some(screenshot) = result.screenshot() {
            let _ = write!(
                details,
                r#"<p><a href="{}">screenshot</a></p>"#,
                escape(&artifact_link(screenshot, output_dir))
            );
        }
        if let Some(trace) = result.trace() {
            let _ = write!(
                details,
                r#"<p><a href="{}">trace</a></p>"#,
                escape(&artifact_link(trace, output_dir))
            );
        }

        let status = result.status.as_str();
        let _ = writeln!(
            html,
            r#"<tr><td>{}</td><td>{}</td><td class="{}">{}</td><td>{}</td><td>{} ms</td><td>{}</td></tr>"#,
            escape(&result.suite),
            escape(&result.name),
            status,
            status,
            result.attempts.len(),
            result.duration_ms,
            details
        );
    }

    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

fn artifact_link(path: &Path, output_dir: &Path) -> String {
    match path.strip_prefix(output_dir) {
        Ok(relative) => format!("../{}", relative.to_string_lossy()),
        Err(_) => path.to_string_lossy().to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_scenario(output_dir: &Path) -> ScenarioResult {
        let error = E2eError::assertion("page title", "/GOOSE/", "'<Hub>'");
        ScenarioResult {
            suite: "routing".into(),
            name: "goose title".into(),
            status: ScenarioStatus::Failed,
            duration_ms: 42,
            attempts: vec![AttemptResult {
                attempt: 1,
                success: false,
                duration_ms: 42,
                steps: vec![],
                failure: Some(FailureDetail::from_error(
                    Some("expect title /GOOSE/".into()),
                    &error,
                )),
                screenshot: Some(output_dir.join("artifacts/routing-goose-title-attempt1.png")),
                trace: None,
            }],
        }
    }

    #[test]
    fn test_counts_and_success() {
        let dir = Path::new("test-results");
        let mut flaky = failed_scenario(dir);
        flaky.status = ScenarioStatus::Flaky;
        let results = TestSuiteResult::new(
            Utc::now(),
            "http://localhost",
            100,
            vec![flaky, ScenarioResult::skipped("hub", "later")],
        );
        assert_eq!(results.total, 2);
        assert_eq!(results.flaky, 1);
        assert_eq!(results.skipped, 1);
        assert!(results.success());

        let results = TestSuiteResult::new(Utc::now(), "http://localhost", 100, vec![failed_scenario(dir)]);
        assert!(!results.success());
    }

    #[test]
    fn test_failure_detail_carries_expected_and_actual() {
        let dir = Path::new("out");
        let scenario = failed_scenario(dir);
        let failure = scenario.failure().unwrap();
        assert_eq!(failure.kind, "assertion_failure");
        assert_eq!(failure.expected.as_deref(), Some("/GOOSE/"));
        assert_eq!(failure.actual.as_deref(), Some("'<Hub>'"));
    }

    #[test]
    fn test_html_escapes_and_links_artifacts() {
        let dir = Path::new("out");
        let results = TestSuiteResult::new(Utc::now(), "http://localhost", 42, vec![failed_scenario(dir)]);
        let html = render_html(&results, dir);
        assert!(html.contains("&#39;&lt;Hub&gt;&#39;"));
        assert!(html.contains(r#"href="../artifacts/routing-goose-title-attempt1.png""#));
        assert!(html.contains(r#"<td class="failed">failed</td>"#));
    }

    #[test]
    fn test_write_reports() {
        let dir = tempfile::tempdir().unwrap();
        let results = TestSuiteResult::new(Utc::now(), "http://localhost", 1, vec![]);

        let paths = write_reports(&results, ReporterKind::Html, dir.path()).unwrap();
        assert!(paths.json.exists());
        assert_eq!(paths.html.as_deref(), Some(dir.path().join("report/index.html").as_path()));

        let reloaded = TestSuiteResult::load(&paths.json).unwrap();
        assert_eq!(reloaded.total, 0);

        let paths = write_reports(&results, ReporterKind::Json, dir.path()).unwrap();
        assert!(paths.html.is_none());
    }
}
