//! Dashprobe E2E runner
//!
//! Loads YAML scenario suites and drives a real browser through them against
//! a deployed dashboard hub:
//! - Navigates routes and waits for network idle plus a stability window
//! - Asserts URLs, titles, text, visibility, counts, attributes and computed styles
//! - Checks HTTP status codes and console output
//! - Retries failing scenarios with a fresh browser session per attempt
//! - Compares production and staging renders pixel by pixel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TestRunner                               │
//! │    ├── Selection::apply(suites) -> [Scenario]               │
//! │    ├── run_scenario() -> ScenarioResult (retries)           │
//! │    └── write_results() -> JSON / HTML report                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Navigator (one page)          HttpProbe (reqwest)          │
//! │    ├── load_route / observe      ├── assert_status          │
//! │    └── assert_* (polled)         └── sweep                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Driver / BrowserSession (trait)                            │
//! │    └── PlaywrightDriver: node bridge, line-delimited JSON   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod compare;
pub mod console;
pub mod driver;
pub mod error;
pub mod http;
pub mod matcher;
pub mod navigator;
pub mod report;
pub mod runner;
pub mod spec;
pub mod visual;

pub use compare::{CompareReport, Comparer};
pub use console::ConsoleFilter;
pub use driver::{BrowserSession, Driver, PlaywrightConfig, PlaywrightDriver};
pub use error::{E2eError, E2eResult};
pub use http::HttpProbe;
pub use matcher::Matcher;
pub use navigator::{Navigator, ObservedPage};
pub use report::{ScenarioStatus, TestSuiteResult};
pub use runner::{RunnerConfig, TestRunner};
pub use spec::{Scenario, Selection, Step, Suite};
