//! Production vs staging render comparison
//!
//! Both deployments are loaded in one session, captured full page and
//! probed for the donut chart's layout. The captures are diffed with
//! [`compare_images`](crate::visual::compare_images).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use dashprobe_common::config::{CompareConfig, TimeoutConfig};

use crate::driver::{Driver, LaunchOptions, Locator};
use crate::error::E2eResult;
use crate::navigator::{Navigator, ObservedPage};
use crate::visual::{compare_images, VisualDiff};

const DONUT: &str = ".donut-svg";
const DONUT_CONTAINER: &str = ".donut-container";
const DONUT_FILL: &str = ".donut-circle-fill";

const CONTAINER_STYLES: [&str; 4] = ["display", "position", "width", "height"];
const SVG_STYLES: [&str; 4] = ["display", "transform", "width", "height"];
const FILL_STYLE: &str = "strokeWidth";

const STYLESHEETS_SCRIPT: &str = r#"Array.from(document.styleSheets).map(ss => {
  let rules = null;
  try { rules = ss.cssRules ? ss.cssRules.length : null; } catch (e) {}
  return { href: ss.href, rules };
})"#;

/// Stylesheet attached to the page; `rules` is `None` when cross-origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylesheetInfo {
    pub href: Option<String>,
    pub rules: Option<u64>,
}

/// What one deployment renders
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMetrics {
    pub url: String,
    pub screenshot: PathBuf,
    pub donut_count: usize,
    pub first_donut_visible: bool,
    pub container_styles: BTreeMap<String, String>,
    pub svg_styles: BTreeMap<String, String>,
    pub stroke_width: Option<String>,
    /// Only sheets whose href mentions `variants`
    pub variant_stylesheets: Vec<StylesheetInfo>,
}

impl PageMetrics {
    /// Flattened `name -> value` view used for diffing
    fn flatten(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert("donut count".to_string(), self.donut_count.to_string());
        values.insert(
            "first donut visible".to_string(),
            self.first_donut_visible.to_string(),
        );
        for (name, value) in &self.container_styles {
            values.insert(format!("{} {}", DONUT_CONTAINER, name), value.clone());
        }
        for (name, value) in &self.svg_styles {
            values.insert(format!("{} {}", DONUT, name), value.clone());
        }
        values.insert(
            format!("{} {}", DONUT_FILL, FILL_STYLE),
            self.stroke_width.clone().unwrap_or_else(|| "-".to_string()),
        );
        let sheets: Vec<String> = self
            .variant_stylesheets
            .iter()
            .map(|s| {
                let href = s.href.as_deref().unwrap_or("inline");
                let name = href.rsplit('/').next().unwrap_or(href);
                match s.rules {
                    Some(rules) => format!("{} ({} rules)", name, rules),
                    None => format!("{} (not accessible)", name),
                }
            })
            .collect();
        values.insert("variants stylesheets".to_string(), sheets.join(", "));
        values
    }
}

/// Metric whose value differs between the deployments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDifference {
    pub metric: String,
    pub production: String,
    pub staging: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareReport {
    pub production: PageMetrics,
    pub staging: PageMetrics,
    pub differences: Vec<MetricDifference>,
    pub visual: VisualDiff,
    pub threshold: f64,
}

impl CompareReport {
    /// Within the pixel threshold and no metric drift
    pub fn passed(&self) -> bool {
        self.visual.matches && self.differences.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub fn metric_differences(
    production: &PageMetrics,
    staging: &PageMetrics,
) -> Vec<MetricDifference> {
    let production = production.flatten();
    let mut staging = staging.flatten();
    let mut differences = Vec::new();

    for (metric, value) in production {
        let other = staging.remove(&metric).unwrap_or_else(|| "-".to_string());
        if value != other {
            differences.push(MetricDifference {
                metric,
                production: value,
                staging: other,
            });
        }
    }
    for (metric, value) in staging {
        differences.push(MetricDifference {
            metric,
            production: "-".to_string(),
            staging: value,
        });
    }
    differences
}

pub struct Comparer {
    driver: Arc<dyn Driver>,
    config: CompareConfig,
    timeouts: TimeoutConfig,
    output_dir: PathBuf,
}

impl Comparer {
    pub fn new(
        driver: Arc<dyn Driver>,
        config: CompareConfig,
        timeouts: TimeoutConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            config,
            timeouts,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Capture both deployments and diff them
    pub async fn compare(&self) -> E2eResult<CompareReport> {
        let options = LaunchOptions {
            stability_window: self.timeouts.stability_window(),
            ..LaunchOptions::default()
        };
        let session = self.driver.launch(&options).await?;

        let captured = async {
            let production = self
                .capture(session.as_ref(), &self.config.production_url, "production")
                .await?;
            let staging = self
                .capture(session.as_ref(), &self.config.staging_url, "staging")
                .await?;
            Ok::<_, crate::error::E2eError>((production, staging))
        }
        .await;

        if let Err(e) = session.close().await {
            warn!("Failed to close compare session: {}", e);
        }
        let (production, staging) = captured?;

        let visual = compare_images(
            &production.screenshot,
            &staging.screenshot,
            &self.output_dir.join("diff.png"),
            self.config.threshold,
        )?;
        let differences = metric_differences(&production, &staging);

        for difference in &differences {
            warn!(
                "{}: production '{}', staging '{}'",
                difference.metric, difference.production, difference.staging
            );
        }
        info!(
            "Compare: {:.2}% pixels differ (threshold {:.2}%), {} metric difference(s)",
            visual.diff_percent,
            self.config.threshold,
            differences.len()
        );

        Ok(CompareReport {
            production,
            staging,
            differences,
            visual,
            threshold: self.config.threshold,
        })
    }

    async fn capture(
        &self,
        session: &dyn crate::driver::BrowserSession,
        url: &str,
        name: &str,
    ) -> E2eResult<PageMetrics> {
        let navigator = Navigator::new(session, url, &self.timeouts);
        navigator.load_route("").await?;

        let screenshot = self.output_dir.join(format!("{}.png", name));
        navigator.screenshot(&screenshot, true).await?;

        let styles: Vec<String> = CONTAINER_STYLES
            .iter()
            .chain(SVG_STYLES.iter())
            .chain(std::iter::once(&FILL_STYLE))
            .map(|s| s.to_string())
            .collect();
        let probes = [
            Locator::css(DONUT),
            Locator::css(DONUT_CONTAINER),
            Locator::css(DONUT_FILL),
        ];
        let observed = navigator.observe(&probes, &styles).await?;

        let stylesheets = session
            .evaluate(navigator.page(), STYLESHEETS_SCRIPT)
            .await?;
        let stylesheets: Vec<StylesheetInfo> = serde_json::from_value(stylesheets)?;

        let metrics = metrics_from(url, screenshot, &observed, stylesheets);
        info!(
            "{}: {} donut(s), first visible: {}",
            name, metrics.donut_count, metrics.first_donut_visible
        );
        Ok(metrics)
    }
}

fn metrics_from(
    url: &str,
    screenshot: PathBuf,
    observed: &ObservedPage,
    stylesheets: Vec<StylesheetInfo>,
) -> PageMetrics {
    let donuts = observed.elements(DONUT);
    let pick = |selector: &str, names: &[&str]| -> BTreeMap<String, String> {
        observed
            .elements(selector)
            .first()
            .map(|element| {
                names
                    .iter()
                    .filter_map(|n| element.styles.get(*n).map(|v| (n.to_string(), v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    };

    PageMetrics {
        url: url.to_string(),
        screenshot,
        donut_count: donuts.len(),
        first_donut_visible: donuts.first().map(|d| d.visible).unwrap_or(false),
        container_styles: pick(DONUT_CONTAINER, &CONTAINER_STYLES),
        svg_styles: pick(DONUT, &SVG_STYLES),
        stroke_width: observed
            .elements(DONUT_FILL)
            .first()
            .and_then(|e| e.styles.get(FILL_STYLE).cloned()),
        variant_stylesheets: stylesheets
            .into_iter()
            .filter(|s| s.href.as_deref().is_some_and(|h| h.contains("variants")))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ElementSnapshot;

    fn snapshot(visible: bool, styles: &[(&str, &str)]) -> ElementSnapshot {
        ElementSnapshot {
            visible,
            styles: styles
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn observed() -> ObservedPage {
        let mut page = ObservedPage::default();
        page.elements.insert(
            DONUT.to_string(),
            vec![
                snapshot(true, &[("display", "block"), ("width", "120px")]),
                snapshot(false, &[]),
            ],
        );
        page.elements.insert(
            DONUT_FILL.to_string(),
            vec![snapshot(true, &[("strokeWidth", "12px")])],
        );
        page
    }

    #[test]
    fn test_metrics_from_observed_page() {
        let sheets = vec![
            StylesheetInfo {
                href: Some("https://hub/css/variants.css".to_string()),
                rules: Some(42),
            },
            StylesheetInfo {
                href: Some("https://hub/css/main.css".to_string()),
                rules: Some(7),
            },
            StylesheetInfo {
                href: None,
                rules: Some(1),
            },
        ];
        let metrics = metrics_from("https://hub/", PathBuf::from("p.png"), &observed(), sheets);

        assert_eq!(metrics.donut_count, 2);
        assert!(metrics.first_donut_visible);
        assert_eq!(metrics.svg_styles.get("width").map(String::as_str), Some("120px"));
        assert!(metrics.container_styles.is_empty());
        assert_eq!(metrics.stroke_width.as_deref(), Some("12px"));
        assert_eq!(metrics.variant_stylesheets.len(), 1);
    }

    #[test]
    fn test_metric_differences() {
        let production = metrics_from("p", PathBuf::new(), &observed(), vec![]);
        let mut staging = production.clone();
        assert!(metric_differences(&production, &staging).is_empty());

        staging.stroke_width = Some("8px".to_string());
        staging.svg_styles.insert("transform".to_string(), "none".to_string());
        let differences = metric_differences(&production, &staging);

        assert_eq!(differences.len(), 2);
        assert!(differences.contains(&MetricDifference {
            metric: ".donut-circle-fill strokeWidth".to_string(),
            production: "12px".to_string(),
            staging: "8px".to_string(),
        }));
        assert!(differences.contains(&MetricDifference {
            metric: ".donut-svg transform".to_string(),
            production: "-".to_string(),
            staging: "none".to_string(),
        }));
    }

    #[test]
    fn test_inaccessible_stylesheet_rules_parse() {
        let value = serde_json::json!([{ "href": "https://cdn/variants.css", "rules": null }]);
        let sheets: Vec<StylesheetInfo> = serde_json::from_value(value).unwrap();
        assert_eq!(sheets[0].rules, None);
    }
}
