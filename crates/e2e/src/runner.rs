//! Main runner: scenarios, retries, sessions and artifacts

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use dashprobe_common::config::{ConsoleConfig, TimeoutConfig};
use dashprobe_common::{ProbeConfig, ReporterKind, RetryPolicy, Viewport};

use crate::console::ConsoleFilter;
use crate::driver::{BrowserSession, Driver, LaunchOptions, Locator};
use crate::error::{E2eError, E2eResult};
use crate::http::HttpProbe;
use crate::matcher::excerpt;
use crate::navigator::Navigator;
use crate::report::{
    write_reports, AttemptResult, FailureDetail, ReportPaths, ScenarioResult, ScenarioStatus,
    StepResult, TestSuiteResult,
};
use crate::spec::{Scenario, Selection, Step, Suite};

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub base_url: String,
    pub suites_dir: PathBuf,
    pub output_dir: PathBuf,
    pub reporter: ReporterKind,
    pub retry: RetryPolicy,
    pub forbid_only: bool,
    pub timeouts: TimeoutConfig,
    pub console: ConsoleConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

impl From<&ProbeConfig> for RunnerConfig {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            suites_dir: config.suites_dir.clone(),
            output_dir: config.output_dir.clone(),
            reporter: config.reporter,
            retry: config.retry_policy(),
            forbid_only: config.forbid_only,
            timeouts: config.timeouts.clone(),
            console: config.console.clone(),
        }
    }
}

impl RunnerConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        self.output_dir.join("artifacts")
    }
}

/// Step record kept for the first-retry trace
#[derive(Debug, Serialize)]
struct TraceEntry {
    step: String,
    started_ms: u64,
    duration_ms: u64,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Trace<'a> {
    scenario: String,
    attempt: u32,
    viewport: Viewport,
    steps: &'a [TraceEntry],
    console: Vec<crate::driver::ConsoleMessage>,
    final_url: Option<String>,
}

/// State shared by the steps of one attempt
struct AttemptContext {
    slug: String,
    label: String,
    console: ConsoleFilter,
    captures: HashMap<String, String>,
}

/// Main E2E test runner
pub struct TestRunner {
    driver: Arc<dyn Driver>,
    http: HttpProbe,
    config: RunnerConfig,
}

impl TestRunner {
    pub fn new(driver: Arc<dyn Driver>, config: RunnerConfig) -> E2eResult<Self> {
        let http = HttpProbe::new(config.base_url.clone(), config.timeouts.http())?;
        Ok(Self {
            driver,
            http,
            config,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run all suites in the suites directory
    pub async fn run_all(&self, selection: &Selection) -> E2eResult<TestSuiteResult> {
        let suites = Suite::load_all(&self.config.suites_dir)?;
        self.run_suites(&suites, selection).await
    }

    pub async fn run_suites(
        &self,
        suites: &[Suite],
        selection: &Selection,
    ) -> E2eResult<TestSuiteResult> {
        let selection = Selection {
            forbid_only: selection.forbid_only || self.config.forbid_only,
            ..selection.clone()
        };
        let scenarios = selection.apply(suites)?;
        Ok(self.run_scenarios(&scenarios).await)
    }

    /// Run scenarios sequentially
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> TestSuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::with_capacity(scenarios.len());

        info!(
            "Running {} scenario(s) against {} with {}",
            scenarios.len(),
            self.config.base_url,
            self.driver.name()
        );

        for scenario in scenarios {
            let result = if scenario.skip {
                info!("- {} (skipped)", scenario.full_name());
                ScenarioResult::skipped(&scenario.suite, &scenario.name)
            } else {
                self.run_scenario(scenario).await
            };
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let summary = TestSuiteResult::new(started_at, &self.config.base_url, duration_ms, results);

        info!(
            "Test Results: {} passed, {} flaky, {} failed, {} skipped ({} ms)",
            summary.passed, summary.flaky, summary.failed, summary.skipped, duration_ms
        );

        summary
    }

    /// Run one scenario under its retry policy
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let policy = match scenario.retries {
            Some(max_retries) => RetryPolicy {
                max_retries,
                backoff: self.config.retry.backoff.clone(),
            },
            None => self.config.retry.clone(),
        };

        let start = Instant::now();
        let mut attempts = Vec::new();

        for attempt in 1..=policy.attempts() {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!("Waiting {:?} before attempt {}", delay, attempt);
                tokio::time::sleep(delay).await;
            }

            let result = self.run_attempt(scenario, attempt).await;
            let success = result.success;
            attempts.push(result);
            if success {
                break;
            }
            if attempt < policy.attempts() {
                warn!("↻ {} failed attempt {}, retrying", scenario.full_name(), attempt);
            }
        }

        let passed = attempts.last().map(|a| a.success).unwrap_or(false);
        let status = match (passed, attempts.len()) {
            (true, 1) => ScenarioStatus::Passed,
            (true, _) => ScenarioStatus::Flaky,
            (false, _) => ScenarioStatus::Failed,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = ScenarioResult {
            suite: scenario.suite.clone(),
            name: scenario.name.clone(),
            status,
            duration_ms,
            attempts,
        };

        match status {
            ScenarioStatus::Passed => info!("✓ {} ({} ms)", scenario.full_name(), duration_ms),
            ScenarioStatus::Flaky => warn!(
                "✓ {} (flaky, {} attempts, {} ms)",
                scenario.full_name(),
                result.attempts.len(),
                duration_ms
            ),
            _ => error!(
                "✗ {} - {}",
                scenario.full_name(),
                result
                    .failure()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown error")
            ),
        }

        result
    }

    /// One attempt in a fresh session; the session is always closed
    async fn run_attempt(&self, scenario: &Scenario, attempt: u32) -> AttemptResult {
        let start = Instant::now();
        let options = LaunchOptions {
            viewport: scenario.viewport.unwrap_or_default(),
            stability_window: self.config.timeouts.stability_window(),
        };

        let session = match self.driver.launch(&options).await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to launch browser for {}: {}", scenario.full_name(), e);
                return AttemptResult {
                    attempt,
                    success: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    steps: Vec::new(),
                    failure: Some(FailureDetail::from_error(None, &e)),
                    screenshot: None,
                    trace: None,
                };
            }
        };

        let mut result = self
            .run_in_session(session.as_ref(), scenario, attempt, &options)
            .await;

        if let Err(e) = session.close().await {
            warn!("Failed to close session for {}: {}", scenario.full_name(), e);
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn run_in_session(
        &self,
        session: &dyn BrowserSession,
        scenario: &Scenario,
        attempt: u32,
        options: &LaunchOptions,
    ) -> AttemptResult {
        let navigator = Navigator::new(session, &self.config.base_url, &self.config.timeouts);
        let console = match &scenario.console_ignore {
            Some(ignore) => ConsoleFilter::new(ignore.clone()),
            None => ConsoleFilter::from_config(&self.config.console),
        };
        let mut ctx = AttemptContext {
            slug: scenario.slug(),
            label: scenario.full_name(),
            console,
            captures: HashMap::new(),
        };

        // Trace the first retry
        let tracing_enabled = attempt == 2;
        let mut trace = Vec::new();
        let start = Instant::now();

        let mut steps = Vec::with_capacity(scenario.steps.len());
        let mut failure = None;

        for step in &scenario.steps {
            let label = step.to_string();
            debug!("[{}] {}", ctx.label, label);
            let step_start = Instant::now();
            let outcome = self.execute_step(&navigator, step, &mut ctx).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            if tracing_enabled {
                trace.push(TraceEntry {
                    step: label.clone(),
                    started_ms: step_start.duration_since(start).as_millis() as u64,
                    duration_ms,
                    url: session.url(navigator.page()).await.ok(),
                    error: outcome.as_ref().err().map(ToString::to_string),
                });
            }

            match outcome {
                Ok(()) => steps.push(StepResult {
                    step: label,
                    success: true,
                    duration_ms,
                    error: None,
                }),
                Err(e) => {
                    steps.push(StepResult {
                        step: label.clone(),
                        success: false,
                        duration_ms,
                        error: Some(e.to_string()),
                    });
                    failure = Some(FailureDetail::from_error(Some(label), &e));
                    break; // Stop on first failure
                }
            }
        }

        let screenshot = match failure {
            Some(_) => self.failure_screenshot(&navigator, &ctx.slug, attempt).await,
            None => None,
        };

        let trace = if tracing_enabled {
            self.write_trace(&navigator, scenario, attempt, options, &trace)
                .await
        } else {
            None
        };

        AttemptResult {
            attempt,
            success: failure.is_none(),
            duration_ms: 0,
            steps,
            failure,
            screenshot,
            trace,
        }
    }

    async fn failure_screenshot(
        &self,
        navigator: &Navigator<'_>,
        slug: &str,
        attempt: u32,
    ) -> Option<PathBuf> {
        let path = self
            .config
            .artifacts_dir()
            .join(format!("{}-attempt{}.png", slug, attempt));
        match navigator.screenshot(&path, true).await {
            Ok(()) => {
                debug!("Failure screenshot: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to capture failure screenshot: {}", e);
                None
            }
        }
    }

    async fn write_trace(
        &self,
        navigator: &Navigator<'_>,
        scenario: &Scenario,
        attempt: u32,
        options: &LaunchOptions,
        entries: &[TraceEntry],
    ) -> Option<PathBuf> {
        let session = navigator.session();
        let trace = Trace {
            scenario: scenario.full_name(),
            attempt,
            viewport: options.viewport,
            steps: entries,
            console: session
                .console(navigator.page())
                .await
                .unwrap_or_default(),
            final_url: session.url(navigator.page()).await.ok(),
        };
        let path = self
            .config
            .artifacts_dir()
            .join(format!("{}-trace.json", scenario.slug()));

        let written = serde_json::to_string_pretty(&trace)
            .map_err(E2eError::from)
            .and_then(|json| {
                std::fs::create_dir_all(self.config.artifacts_dir())?;
                std::fs::write(&path, json)?;
                Ok(())
            });

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Failed to write trace: {}", e);
                None
            }
        }
    }

    fn execute_step<'s>(
        &'s self,
        nav: &'s Navigator<'s>,
        step: &'s Step,
        ctx: &'s mut AttemptContext,
    ) -> BoxFuture<'s, E2eResult<()>> {
        async move {
            match step {
                Step::Goto {
                    route,
                    timeout_ms,
                    wait_until,
                    status,
                } => {
                    let observed = nav
                        .load_route_with(route, wait_until.unwrap_or_default(), millis(*timeout_ms))
                        .await?;
                    match (status, observed.status) {
                        (None, _) => Ok(()),
                        (Some(expected), Some(actual)) if *expected == actual => Ok(()),
                        (Some(expected), Some(actual)) => Err(E2eError::HttpStatusMismatch {
                            url: observed.url,
                            expected: *expected,
                            actual,
                        }),
                        (Some(expected), None) => Err(E2eError::assertion(
                            format!("document status of {}", route),
                            expected,
                            "no response",
                        )),
                    }
                }

                Step::Click {
                    selector,
                    has_text,
                    nth,
                    timeout_ms,
                } => {
                    nav.click(&target(selector, has_text, *nth), millis(*timeout_ms))
                        .await
                }

                Step::Hover {
                    selector,
                    has_text,
                    nth,
                    timeout_ms,
                } => {
                    nav.hover(&target(selector, has_text, *nth), millis(*timeout_ms))
                        .await
                }

                Step::Back { timeout_ms } => nav.back(millis(*timeout_ms)).await.map(drop),
                Step::Forward { timeout_ms } => nav.forward(millis(*timeout_ms)).await.map(drop),
                Step::Reload { timeout_ms } => nav.reload(millis(*timeout_ms)).await.map(drop),
                Step::WaitForIdle { timeout_ms } => nav.wait_for_idle(millis(*timeout_ms)).await,

                Step::Sleep { ms } => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    Ok(())
                }

                Step::SetViewport { width, height } => {
                    nav.set_viewport(Viewport::new(*width, *height)).await
                }

                Step::ExpectUrl {
                    matches,
                    timeout_ms,
                } => nav.assert_url(matches, millis(*timeout_ms)).await,

                Step::ExpectTitle {
                    matches,
                    timeout_ms,
                } => nav.assert_title(matches, millis(*timeout_ms)).await,

                Step::ExpectText {
                    selector,
                    has_text,
                    nth,
                    matches,
                    timeout_ms,
                } => {
                    nav.assert_text(&target(selector, has_text, *nth), matches, millis(*timeout_ms))
                        .await
                }

                Step::ExpectVisible {
                    selector,
                    has_text,
                    nth,
                    all,
                    timeout_ms,
                } => {
                    nav.assert_visible(&target(selector, has_text, *nth), *all, millis(*timeout_ms))
                        .await
                }

                Step::ExpectCount {
                    selector,
                    has_text,
                    equals,
                    at_least,
                    timeout_ms,
                } => {
                    nav.assert_count(
                        &target(selector, has_text, None),
                        *equals,
                        *at_least,
                        millis(*timeout_ms),
                    )
                    .await
                }

                Step::ExpectAttribute {
                    selector,
                    has_text,
                    nth,
                    name,
                    matches,
                    all,
                    timeout_ms,
                } => {
                    nav.assert_attribute(
                        &target(selector, has_text, *nth),
                        name,
                        matches.as_ref(),
                        *all,
                        millis(*timeout_ms),
                    )
                    .await
                }

                Step::ExpectStyle {
                    selector,
                    has_text,
                    nth,
                    property,
                    expected,
                    all,
                    timeout_ms,
                } => {
                    nav.assert_computed_style(
                        &target(selector, has_text, *nth),
                        property,
                        expected,
                        *all,
                        millis(*timeout_ms),
                    )
                    .await
                }

                Step::ExpectStatus { route, code } => {
                    self.http.assert_status(route, *code).await.map(drop)
                }

                Step::ExpectHttpBody {
                    route,
                    status,
                    matches,
                } => self.http.assert_body(route, *status, matches).await.map(drop),

                Step::ExpectNoConsoleErrors { ignore, settle_ms } => {
                    let settle = settle_ms.unwrap_or(self.config.console.settle_ms);
                    if settle > 0 {
                        tokio::time::sleep(Duration::from_millis(settle)).await;
                    }
                    let filter = match ignore {
                        Some(ignore) => ConsoleFilter::new(ignore.clone()),
                        None => ctx.console.clone(),
                    };
                    nav.assert_no_console_errors(&filter).await
                }

                Step::Capture { key, of } => {
                    let value = nav.read(*of).await?;
                    debug!("Captured {} as '{}': {}", of, key, excerpt(&value, 60));
                    ctx.captures.insert(key.clone(), value);
                    Ok(())
                }

                Step::ExpectCaptured { key, of, same } => {
                    let previous = ctx.captures.get(key).ok_or_else(|| {
                        E2eError::SpecParse(format!("nothing captured under '{}'", key))
                    })?;
                    let current = nav.read(*of).await?;
                    if (&current == previous) == *same {
                        Ok(())
                    } else {
                        let expected = if *same {
                            format!("same {} as capture '{}' ({})", of, key, excerpt(previous, 60))
                        } else {
                            format!("{} different from capture '{}'", of, key)
                        };
                        Err(E2eError::assertion(
                            format!("captured {}", of),
                            expected,
                            excerpt(&current, 60),
                        ))
                    }
                }

                Step::ExpectLoadTime {
                    route,
                    under_ms,
                    wait_until,
                } => nav
                    .assert_load_time(route, *wait_until, Duration::from_millis(*under_ms))
                    .await
                    .map(drop),

                Step::ExpectCookiesScoped => nav.assert_cookies_scoped().await.map(|cookies| {
                    debug!("{} cookie(s) in scope", cookies.len());
                }),

                Step::Screenshot { name, full_page } => {
                    let path = self
                        .config
                        .artifacts_dir()
                        .join(format!("{}-{}.png", ctx.slug, name));
                    nav.screenshot(&path, *full_page).await?;
                    info!("[{}] screenshot {}", ctx.label, path.display());
                    Ok(())
                }

                Step::Concurrent { visits } => {
                    let routes: Vec<String> = visits.iter().map(|v| v.route.clone()).collect();
                    let pages = nav.load_concurrently(&routes).await?;
                    for (visit, page) in visits.iter().zip(&pages) {
                        if let Some(matcher) = &visit.url {
                            if !matcher.matches(&page.url) {
                                return Err(E2eError::assertion(
                                    format!("url of concurrent page {}", visit.route),
                                    matcher,
                                    format!("'{}'", page.url),
                                ));
                            }
                        }
                    }
                    Ok(())
                }

                Step::Any { steps } => {
                    let mut errors = Vec::new();
                    for nested in steps {
                        match self.execute_step(nav, nested, ctx).await {
                            Ok(()) => return Ok(()),
                            Err(e) if e.is_check_failure() => {
                                errors.push(format!("{}: {}", nested, e))
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Err(E2eError::assertion(
                        format!("any of {} steps", steps.len()),
                        "at least one to pass",
                        errors.join("; "),
                    ))
                }

                Step::Repeat { times, steps } => {
                    for _ in 0..*times {
                        for nested in steps {
                            self.execute_step(nav, nested, ctx).await?;
                        }
                    }
                    Ok(())
                }

                Step::Log { message } => {
                    info!("[{}] {}", ctx.label, message);
                    Ok(())
                }
            }
        }
        .boxed()
    }

    /// Write JSON (and HTML) reports into the output directory
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<ReportPaths> {
        write_reports(results, self.config.reporter, &self.config.output_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }
}

fn target(selector: &str, has_text: &Option<String>, nth: Option<usize>) -> Locator {
    Locator {
        selector: selector.to_string(),
        has_text: has_text.clone(),
        nth,
    }
}

fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}
