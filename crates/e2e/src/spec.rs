//! Declarative YAML scenario suites
//!
//! A suite file groups scenarios that share `before_each` steps:
//!
//! ```yaml
//! name: routing
//! before_each:
//!   - action: goto
//!     route: /
//! scenarios:
//!   - name: hub renders
//!     steps:
//!       - action: expect_title
//!         matches: { regex: "(?i)graph" }
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use dashprobe_common::Viewport;

use crate::driver::{Locator, WaitUntil};
use crate::error::{E2eError, E2eResult};
use crate::matcher::Matcher;

/// One YAML file worth of scenarios
#[derive(Debug, Clone, Deserialize)]
pub struct Suite {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Steps prepended to every scenario of the suite
    #[serde(default)]
    pub before_each: Vec<Step>,

    #[serde(default)]
    pub scenarios: Vec<Scenario>,

    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// An independent test case
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Run only scenarios marked `only` (rejected in CI)
    #[serde(default)]
    pub only: bool,

    #[serde(default)]
    pub skip: bool,

    /// Starting viewport; desktop when absent
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Overrides the configured retry count
    #[serde(default)]
    pub retries: Option<u32>,

    /// Overrides the configured console ignore list; empty means strict
    #[serde(default)]
    pub console_ignore: Option<Vec<String>>,

    pub steps: Vec<Step>,

    /// Owning suite, filled in on load
    #[serde(skip)]
    pub suite: String,
}

/// A single step of a scenario
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a route relative to the base URL and wait for it to settle
    Goto {
        route: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        wait_until: Option<WaitUntil>,
        /// Expected status of the main document
        #[serde(default)]
        status: Option<u16>,
    },

    Click {
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        nth: Option<usize>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Hover {
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        nth: Option<usize>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Back {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Forward {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Reload {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait until the current page is idle again (after a click)
    WaitForIdle {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fixed pause (use sparingly)
    Sleep { ms: u64 },

    SetViewport { width: u32, height: u32 },

    ExpectUrl {
        matches: Matcher,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectTitle {
        matches: Matcher,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Text of the first matching element (default `body`)
    ExpectText {
        #[serde(default = "default_text_selector")]
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        nth: Option<usize>,
        matches: Matcher,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectVisible {
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        nth: Option<usize>,
        /// Every match must be visible, not just the first
        #[serde(default)]
        all: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    ExpectCount {
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        equals: Option<usize>,
        #[serde(default)]
        at_least: Option<usize>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Attribute presence, or value when `matches` is given
    ExpectAttribute {
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        nth: Option<usize>,
        name: String,
        #[serde(default)]
        matches: Option<Matcher>,
        #[serde(default)]
        all: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Computed style property (camelCase, as `getComputedStyle` names it)
    ExpectStyle {
        selector: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        nth: Option<usize>,
        property: String,
        expected: Matcher,
        #[serde(default)]
        all: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Direct HTTP status check, bypassing the browser
    ExpectStatus {
        route: String,
        #[serde(default = "default_status")]
        code: u16,
    },

    ExpectHttpBody {
        route: String,
        #[serde(default = "default_status")]
        status: u16,
        matches: Matcher,
    },

    ExpectNoConsoleErrors {
        /// Replaces the scenario/config ignore list for this check
        #[serde(default)]
        ignore: Option<Vec<String>>,
        /// Extra wait for late console output
        #[serde(default)]
        settle_ms: Option<u64>,
    },

    /// Remember a value of the current page under `key`
    Capture { key: String, of: CaptureSource },

    /// Compare the current value with a captured one
    ExpectCaptured {
        key: String,
        of: CaptureSource,
        #[serde(default = "default_true")]
        same: bool,
    },

    /// Navigate to a route and require the navigation to finish within `under_ms`
    ExpectLoadTime {
        route: String,
        under_ms: u64,
        #[serde(default = "default_load_state")]
        wait_until: WaitUntil,
    },

    /// Every cookie in the session must be scoped to the base host
    ExpectCookiesScoped,

    Screenshot {
        name: String,
        #[serde(default)]
        full_page: bool,
    },

    /// Load several routes in parallel pages of the same session
    Concurrent { visits: Vec<Visit> },

    /// Passes when any nested step passes
    Any { steps: Vec<Step> },

    /// Run nested steps `times` times in a row
    Repeat { times: u32, steps: Vec<Step> },

    Log { message: String },
}

fn default_text_selector() -> String {
    "body".to_string()
}

fn default_status() -> u16 {
    200
}

fn default_load_state() -> WaitUntil {
    WaitUntil::Load
}

fn default_true() -> bool {
    true
}

/// Page value a capture step reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    Title,
    Url,
    Content,
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureSource::Title => "title",
            CaptureSource::Url => "url",
            CaptureSource::Content => "content",
        };
        f.write_str(name)
    }
}

/// One page of a `concurrent` step
#[derive(Debug, Clone, Deserialize)]
pub struct Visit {
    pub route: String,
    /// Expected final URL; any URL when absent
    #[serde(default)]
    pub url: Option<Matcher>,
}

fn locator(selector: &str, has_text: &Option<String>, nth: Option<usize>) -> Locator {
    Locator {
        selector: selector.to_string(),
        has_text: has_text.clone(),
        nth,
    }
}

impl Step {
    /// Element target of selector-based steps
    pub fn locator(&self) -> Option<Locator> {
        match self {
            Step::Click {
                selector,
                has_text,
                nth,
                ..
            }
            | Step::Hover {
                selector,
                has_text,
                nth,
                ..
            }
            | Step::ExpectText {
                selector,
                has_text,
                nth,
                ..
            }
            | Step::ExpectVisible {
                selector,
                has_text,
                nth,
                ..
            }
            | Step::ExpectAttribute {
                selector,
                has_text,
                nth,
                ..
            }
            | Step::ExpectStyle {
                selector,
                has_text,
                nth,
                ..
            } => Some(locator(selector, has_text, *nth)),
            Step::ExpectCount {
                selector, has_text, ..
            } => Some(locator(selector, has_text, None)),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Step::ExpectCount {
                equals: None,
                at_least: None,
                selector,
                ..
            } => Err(format!(
                "expect_count on '{}' needs `equals` or `at_least`",
                selector
            )),
            Step::Any { steps } if steps.is_empty() => Err("`any` needs at least one step".into()),
            Step::Any { steps } => steps.iter().try_for_each(Step::validate),
            Step::Repeat { times: 0, .. } => Err("`repeat` needs `times` of at least 1".into()),
            Step::Repeat { steps, .. } => steps.iter().try_for_each(Step::validate),
            Step::Concurrent { visits } if visits.is_empty() => {
                Err("`concurrent` needs at least one visit".into())
            }
            Step::Goto { route, .. }
            | Step::ExpectStatus { route, .. }
            | Step::ExpectHttpBody { route, .. }
            | Step::ExpectLoadTime { route, .. }
                if route.trim().is_empty() =>
            {
                Err("route must not be empty".into())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Goto { route, .. } => write!(f, "goto {}", route),
            Step::Click { .. } | Step::Hover { .. } => {
                let verb = if matches!(self, Step::Click { .. }) {
                    "click"
                } else {
                    "hover"
                };
                match self.locator() {
                    Some(target) => write!(f, "{} {}", verb, target),
                    None => f.write_str(verb),
                }
            }
            Step::Back { .. } => f.write_str("back"),
            Step::Forward { .. } => f.write_str("forward"),
            Step::Reload { .. } => f.write_str("reload"),
            Step::WaitForIdle { .. } => f.write_str("wait for idle"),
            Step::Sleep { ms } => write!(f, "sleep {} ms", ms),
            Step::SetViewport { width, height } => write!(f, "set viewport {}x{}", width, height),
            Step::ExpectUrl { matches, .. } => write!(f, "expect url {}", matches),
            Step::ExpectTitle { matches, .. } => write!(f, "expect title {}", matches),
            Step::ExpectText { selector, matches, .. } => {
                write!(f, "expect text of {} {}", selector, matches)
            }
            Step::ExpectVisible { selector, .. } => write!(f, "expect {} visible", selector),
            Step::ExpectCount {
                selector,
                equals,
                at_least,
                ..
            } => match (equals, at_least) {
                (Some(n), _) => write!(f, "expect {} count == {}", selector, n),
                (None, Some(n)) => write!(f, "expect {} count >= {}", selector, n),
                (None, None) => write!(f, "expect {} count", selector),
            },
            Step::ExpectAttribute { selector, name, .. } => {
                write!(f, "expect {} [{}]", selector, name)
            }
            Step::ExpectStyle {
                selector,
                property,
                expected,
                ..
            } => write!(f, "expect {} {} {}", selector, property, expected),
            Step::ExpectStatus { route, code } => write!(f, "expect GET {} -> {}", route, code),
            Step::ExpectHttpBody { route, matches, .. } => {
                write!(f, "expect GET {} body {}", route, matches)
            }
            Step::ExpectNoConsoleErrors { .. } => f.write_str("expect no console errors"),
            Step::Capture { key, of } => write!(f, "capture {} as '{}'", of, key),
            Step::ExpectCaptured { key, of, same } => {
                let relation = if *same { "equals" } else { "differs from" };
                write!(f, "expect {} {} capture '{}'", of, relation, key)
            }
            Step::ExpectLoadTime { route, under_ms, .. } => {
                write!(f, "expect {} loads under {} ms", route, under_ms)
            }
            Step::ExpectCookiesScoped => f.write_str("expect cookies scoped to base host"),
            Step::Screenshot { name, .. } => write!(f, "screenshot {}", name),
            Step::Concurrent { visits } => {
                let routes: Vec<&str> = visits.iter().map(|v| v.route.as_str()).collect();
                write!(f, "concurrent {}", routes.join(", "))
            }
            Step::Any { steps } => write!(f, "any of {} steps", steps.len()),
            Step::Repeat { times, steps } => {
                write!(f, "repeat {} steps {} times", steps.len(), times)
            }
            Step::Log { message } => write!(f, "log {}", message),
        }
    }
}

impl Scenario {
    /// `suite-name` style identifier used for artifact file names
    pub fn slug(&self) -> String {
        let raw = if self.suite.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.suite, self.name)
        };
        let mut slug = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        slug.trim_matches('-').to_string()
    }

    /// `suite › name` for logs and reports
    pub fn full_name(&self) -> String {
        if self.suite.is_empty() {
            self.name.clone()
        } else {
            format!("{} › {}", self.suite, self.name)
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl Suite {
    /// Parse a suite from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let mut suite: Suite = serde_yaml::from_str(yaml)?;
        suite.validate()?;
        for scenario in &mut suite.scenarios {
            scenario.suite = suite.name.clone();
        }
        Ok(suite)
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut suite = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        suite.source = Some(path.to_path_buf());
        Ok(suite)
    }

    /// Load every `*.yaml`/`*.yml` suite under a directory, ordered by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::SpecParse(format!(
                "suites directory not found: {}",
                dir.display()
            )));
        }

        let mut suites = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            suites.push(Self::from_file(entry.path())?);
        }

        let mut names = HashSet::new();
        for suite in &suites {
            if !names.insert(suite.name.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "duplicate suite name '{}'",
                    suite.name
                )));
            }
        }

        Ok(suites)
    }

    /// Scenarios with the suite's `before_each` steps prepended
    pub fn expanded(&self) -> Vec<Scenario> {
        self.scenarios
            .iter()
            .map(|scenario| {
                let mut scenario = scenario.clone();
                let mut steps = self.before_each.clone();
                steps.append(&mut scenario.steps);
                scenario.steps = steps;
                scenario
            })
            .collect()
    }

    fn validate(&self) -> E2eResult<()> {
        let mut names = HashSet::new();
        for step in &self.before_each {
            step.validate()
                .map_err(|e| E2eError::SpecParse(format!("{} before_each: {}", self.name, e)))?;
        }
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "duplicate scenario '{}' in suite '{}'",
                    scenario.name, self.name
                )));
            }
            for step in &scenario.steps {
                step.validate().map_err(|e| {
                    E2eError::SpecParse(format!("{} › {}: {}", self.name, scenario.name, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Which scenarios a run should execute
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Scenario must carry every tag
    pub tags: Vec<String>,
    /// Substring of the full scenario name
    pub name: Option<String>,
    /// Reject `only` scenarios instead of focusing on them
    pub forbid_only: bool,
}

impl Selection {
    /// Expand suites and apply filters, `only` focus and `skip`
    ///
    /// Skipped scenarios are returned too so they can be reported.
    pub fn apply(&self, suites: &[Suite]) -> E2eResult<Vec<Scenario>> {
        let mut scenarios: Vec<Scenario> = suites
            .iter()
            .flat_map(Suite::expanded)
            .filter(|s| self.tags.iter().all(|tag| s.has_tag(tag)))
            .filter(|s| {
                self.name
                    .as_deref()
                    .map(|needle| s.full_name().contains(needle))
                    .unwrap_or(true)
            })
            .collect();

        let focused: Vec<String> = scenarios
            .iter()
            .filter(|s| s.only)
            .map(Scenario::full_name)
            .collect();

        if !focused.is_empty() {
            if self.forbid_only {
                return Err(E2eError::OnlyForbidden(focused));
            }
            scenarios.retain(|s| s.only);
        }

        Ok(scenarios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTING: &str = r#"
name: routing
description: Route resolution
before_each:
  - action: goto
    route: /
scenarios:
  - name: goose redirects to canonical form
    tags: [routing, smoke]
    steps:
      - action: goto
        route: /goose
      - action: expect_url
        matches: { regex: "/goose/$" }
  - name: status badges are green
    viewport: { width: 375, height: 667 }
    console_ignore: []
    steps:
      - action: expect_style
        selector: .status-badge
        property: backgroundColor
        expected: { exact: "rgb(16, 185, 129)" }
        all: true
      - action: expect_status
        route: /health
"#;

    #[test]
    fn test_parse_suite() {
        let suite = Suite::from_yaml(ROUTING).unwrap();
        assert_eq!(suite.name, "routing");
        assert_eq!(suite.before_each.len(), 1);
        assert_eq!(suite.scenarios.len(), 2);
        assert_eq!(suite.scenarios[0].suite, "routing");

        let badges = &suite.scenarios[1];
        assert_eq!(badges.viewport, Some(Viewport::MOBILE));
        assert_eq!(badges.console_ignore, Some(vec![]));
        assert!(matches!(
            badges.steps[1],
            Step::ExpectStatus { code: 200, .. }
        ));
    }

    #[test]
    fn test_before_each_is_prepended() {
        let suite = Suite::from_yaml(ROUTING).unwrap();
        let expanded = suite.expanded();
        assert_eq!(expanded[0].steps.len(), 3);
        assert!(matches!(&expanded[0].steps[0], Step::Goto { route, .. } if route == "/"));
        assert!(matches!(&expanded[0].steps[1], Step::Goto { route, .. } if route == "/goose"));
    }

    #[test]
    fn test_unit_like_steps() {
        let yaml = r#"
name: nav
scenarios:
  - name: history
    steps:
      - action: back
      - action: forward
        timeout_ms: 1000
      - action: expect_cookies_scoped
      - action: capture
        key: before
        of: title
      - action: expect_captured
        key: before
        of: title
"#;
        let suite = Suite::from_yaml(yaml).unwrap();
        let steps = &suite.scenarios[0].steps;
        assert!(matches!(steps[0], Step::Back { timeout_ms: None }));
        assert!(matches!(steps[1], Step::Forward { timeout_ms: Some(1000) }));
        assert!(matches!(steps[2], Step::ExpectCookiesScoped));
        assert!(matches!(&steps[4], Step::ExpectCaptured { same: true, .. }));
    }

    #[test]
    fn test_count_without_bound_is_rejected() {
        let yaml = r#"
name: broken
scenarios:
  - name: count
    steps:
      - action: expect_count
        selector: a
"#;
        let err = Suite::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("equals"));
    }

    #[test]
    fn test_duplicate_scenarios_are_rejected() {
        let yaml = r#"
name: dup
scenarios:
  - name: same
    steps: []
  - name: same
    steps: []
"#;
        assert!(Suite::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = r#"
name: bad
scenarios:
  - name: typo
    steps:
      - action: clik
        selector: a
"#;
        assert!(Suite::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_selection_focuses_only() {
        let yaml = r#"
name: focus
scenarios:
  - name: a
    tags: [smoke]
    steps: []
  - name: b
    only: true
    steps: []
"#;
        let suites = vec![Suite::from_yaml(yaml).unwrap()];

        let picked = Selection::default().apply(&suites).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "b");

        let forbidden = Selection {
            forbid_only: true,
            ..Default::default()
        };
        assert!(matches!(
            forbidden.apply(&suites),
            Err(E2eError::OnlyForbidden(names)) if names == vec!["focus › b".to_string()]
        ));

        let tagged = Selection {
            tags: vec!["smoke".into()],
            ..Default::default()
        };
        let picked = tagged.apply(&suites).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "a");
    }

    #[test]
    fn test_slug() {
        let suite = Suite::from_yaml(ROUTING).unwrap();
        assert_eq!(
            suite.scenarios[0].slug(),
            "routing-goose-redirects-to-canonical-form"
        );
    }

    #[test]
    fn test_step_display() {
        let suite = Suite::from_yaml(ROUTING).unwrap();
        let steps = &suite.scenarios[1].steps;
        assert_eq!(
            steps[0].to_string(),
            "expect .status-badge backgroundColor 'rgb(16, 185, 129)'"
        );
        assert_eq!(steps[1].to_string(), "expect GET /health -> 200");
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: b\nscenarios: []\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: a\nscenarios: []\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let suites = Suite::load_all(dir.path()).unwrap();
        let names: Vec<&str> = suites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(suites[0].source.is_some());
    }
}
