//! Route loading and page assertions
//!
//! A [`Navigator`] drives one page of a [`BrowserSession`]. Page checks are
//! re-polled until the expect timeout elapses, so content that renders
//! after the network goes idle still passes.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use dashprobe_common::config::{resolve_url, TimeoutConfig};
use dashprobe_common::Viewport;

use crate::console::ConsoleFilter;
use crate::driver::{
    BrowserSession, ConsoleLevel, Cookie, ElementSnapshot, Locator, Navigation, PageId, WaitUntil,
};
use crate::error::{E2eError, E2eResult};
use crate::matcher::{excerpt, Matcher};
use crate::spec::CaptureSource;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured state of a loaded page
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservedPage {
    /// Route or URL that was requested
    pub requested: String,
    /// Final URL after redirects
    pub url: String,
    pub title: String,
    /// Main document status, when the engine reported one
    pub status: Option<u16>,
    pub load_time_ms: u64,
    /// Error-level console messages so far, unfiltered
    pub console_errors: Vec<String>,
    /// Element snapshots keyed by probed selector
    pub elements: BTreeMap<String, Vec<ElementSnapshot>>,
}

impl ObservedPage {
    pub fn elements(&self, selector: &str) -> &[ElementSnapshot] {
        self.elements
            .get(selector)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Assertions and navigation on one page of a session
pub struct Navigator<'a> {
    session: &'a dyn BrowserSession,
    page: PageId,
    base_url: String,
    timeouts: TimeoutConfig,
}

impl<'a> Navigator<'a> {
    /// Navigator on the session's main page
    pub fn new(session: &'a dyn BrowserSession, base_url: &str, timeouts: &TimeoutConfig) -> Self {
        Self {
            session,
            page: session.main_page(),
            base_url: base_url.to_string(),
            timeouts: timeouts.clone(),
        }
    }

    pub fn session(&self) -> &'a dyn BrowserSession {
        self.session
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn url_for(&self, route: &str) -> String {
        resolve_url(&self.base_url, route)
    }

    /// Navigate to `base_url + route`, wait for the stability window and capture the page
    pub async fn load_route(&self, route: &str) -> E2eResult<ObservedPage> {
        self.load_route_with(route, WaitUntil::NetworkIdle, None)
            .await
    }

    pub async fn load_route_with(
        &self,
        route: &str,
        wait_until: WaitUntil,
        timeout: Option<Duration>,
    ) -> E2eResult<ObservedPage> {
        self.load_on(self.page, route, wait_until, timeout).await
    }

    async fn load_on(
        &self,
        page: PageId,
        route: &str,
        wait_until: WaitUntil,
        timeout: Option<Duration>,
    ) -> E2eResult<ObservedPage> {
        let url = self.url_for(route);
        let timeout = timeout.unwrap_or_else(|| self.timeouts.navigation());
        debug!("Loading {}", url);

        let start = Instant::now();
        let navigation = self.session.goto(page, &url, wait_until, timeout).await?;
        let load_time_ms = start.elapsed().as_millis() as u64;

        let mut observed = self.observe_on(page, &[], &[]).await?;
        observed.requested = route.to_string();
        observed.status = navigation.status;
        observed.load_time_ms = load_time_ms;
        debug!(
            "Loaded {} -> {} ({:?}, {} ms)",
            route, observed.url, observed.status, load_time_ms
        );
        Ok(observed)
    }

    /// Capture the current page, snapshotting each probe with the given styles
    pub async fn observe(&self, probes: &[Locator], styles: &[String]) -> E2eResult<ObservedPage> {
        self.observe_on(self.page, probes, styles).await
    }

    async fn observe_on(
        &self,
        page: PageId,
        probes: &[Locator],
        styles: &[String],
    ) -> E2eResult<ObservedPage> {
        let url = self.session.url(page).await?;
        let title = self.session.title(page).await?;
        let console_errors = self
            .session
            .console(page)
            .await?
            .into_iter()
            .filter(|m| m.level == ConsoleLevel::Error)
            .map(|m| m.text)
            .collect();

        let mut elements = BTreeMap::new();
        for probe in probes {
            let snapshots = self.session.query(page, probe, styles).await?;
            elements.insert(probe.selector.clone(), snapshots);
        }

        Ok(ObservedPage {
            requested: url.clone(),
            url,
            title,
            status: None,
            load_time_ms: 0,
            console_errors,
            elements,
        })
    }

    /// Load several routes at once, each in its own page of this session
    ///
    /// The extra pages are closed afterwards whatever the outcome.
    pub async fn load_concurrently(&self, routes: &[String]) -> E2eResult<Vec<ObservedPage>> {
        let mut pages = Vec::with_capacity(routes.len());
        for _ in routes {
            match self.session.new_page().await {
                Ok(page) => pages.push(page),
                Err(e) => {
                    self.close_pages(&pages).await;
                    return Err(e);
                }
            }
        }

        let loads = pages
            .iter()
            .zip(routes)
            .map(|(page, route)| self.load_on(*page, route, WaitUntil::NetworkIdle, None));
        let results = join_all(loads).await;

        self.close_pages(&pages).await;
        results.into_iter().collect()
    }

    async fn close_pages(&self, pages: &[PageId]) {
        for page in pages {
            if let Err(e) = self.session.close_page(*page).await {
                warn!("Failed to close page {}: {}", page, e);
            }
        }
    }

    pub async fn click(&self, target: &Locator, timeout: Option<Duration>) -> E2eResult<()> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.action());
        self.session.click(self.page, target, timeout).await
    }

    pub async fn hover(&self, target: &Locator, timeout: Option<Duration>) -> E2eResult<()> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.action());
        self.session.hover(self.page, target, timeout).await
    }

    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> E2eResult<()> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.navigation());
        self.session
            .wait_for_load(self.page, WaitUntil::NetworkIdle, timeout)
            .await
    }

    pub async fn back(&self, timeout: Option<Duration>) -> E2eResult<Navigation> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.navigation());
        self.session.go_back(self.page, timeout).await
    }

    pub async fn forward(&self, timeout: Option<Duration>) -> E2eResult<Navigation> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.navigation());
        self.session.go_forward(self.page, timeout).await
    }

    pub async fn reload(&self, timeout: Option<Duration>) -> E2eResult<Navigation> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.navigation());
        self.session.reload(self.page, timeout).await
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> E2eResult<()> {
        self.session.set_viewport(self.page, viewport).await
    }

    pub async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        self.session.screenshot(self.page, path, full_page).await
    }

    /// Current value of a capturable page property
    pub async fn read(&self, source: CaptureSource) -> E2eResult<String> {
        match source {
            CaptureSource::Title => self.session.title(self.page).await,
            CaptureSource::Url => self.session.url(self.page).await,
            CaptureSource::Content => self.session.content(self.page).await,
        }
    }

    /// Retry `check` until it passes or the timeout elapses
    ///
    /// Only assertion failures are retried; driver errors end the wait.
    async fn eventually<F, Fut>(&self, timeout: Option<Duration>, mut check: F) -> E2eResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<()>>,
    {
        let deadline = Instant::now() + timeout.unwrap_or_else(|| self.timeouts.expect());
        loop {
            match check().await {
                Ok(()) => return Ok(()),
                Err(e @ E2eError::AssertionFailure { .. }) => {
                    if Instant::now() >= deadline {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn assert_url(&self, matcher: &Matcher, timeout: Option<Duration>) -> E2eResult<()> {
        self.eventually(timeout, move || async move {
            let url = self.session.url(self.page).await?;
            if matcher.matches(&url) {
                Ok(())
            } else {
                Err(E2eError::assertion("page url", matcher, format!("'{}'", url)))
            }
        })
        .await
    }

    pub async fn assert_title(&self, matcher: &Matcher, timeout: Option<Duration>) -> E2eResult<()> {
        self.eventually(timeout, move || async move {
            let title = self.session.title(self.page).await?;
            if matcher.matches(&title) {
                Ok(())
            } else {
                Err(E2eError::assertion("page title", matcher, format!("'{}'", title)))
            }
        })
        .await
    }

    /// Text of the first element matching `target`
    pub async fn assert_text(
        &self,
        target: &Locator,
        matcher: &Matcher,
        timeout: Option<Duration>,
    ) -> E2eResult<()> {
        self.eventually(timeout, move || async move {
            let elements = self.session.query(self.page, target, &[]).await?;
            let assertion = format!("text of {}", target);
            match elements.first() {
                None => Err(E2eError::assertion(assertion, matcher, "no matching element")),
                Some(element) if matcher.matches(&element.text) => Ok(()),
                Some(element) => Err(E2eError::assertion(
                    assertion,
                    matcher,
                    excerpt(&element.text, 120),
                )),
            }
        })
        .await
    }

    /// First match visible, or every match with `all`
    pub async fn assert_visible(
        &self,
        target: &Locator,
        all: bool,
        timeout: Option<Duration>,
    ) -> E2eResult<()> {
        self.eventually(timeout, move || async move {
            let elements = self.session.query(self.page, target, &[]).await?;
            let assertion = format!("visibility of {}", target);
            if elements.is_empty() {
                return Err(E2eError::assertion(assertion, "visible", "no matching element"));
            }
            let checked = if all { &elements[..] } else { &elements[..1] };
            let hidden = checked.iter().filter(|e| !e.visible).count();
            if hidden == 0 {
                Ok(())
            } else if all {
                Err(E2eError::assertion(
                    assertion,
                    "all visible",
                    format!("{} of {} hidden", hidden, elements.len()),
                ))
            } else {
                Err(E2eError::assertion(assertion, "visible", "hidden"))
            }
        })
        .await
    }

    pub async fn assert_count(
        &self,
        target: &Locator,
        equals: Option<usize>,
        at_least: Option<usize>,
        timeout: Option<Duration>,
    ) -> E2eResult<()> {
        self.eventually(timeout, move || async move {
            let count = self.session.query(self.page, target, &[]).await?.len();
            let assertion = format!("count of {}", target);
            if let Some(expected) = equals {
                if count != expected {
                    return Err(E2eError::assertion(assertion, expected, count));
                }
            }
            if let Some(minimum) = at_least {
                if count < minimum {
                    return Err(E2eError::assertion(
                        assertion,
                        format!("at least {}", minimum),
                        count,
                    ));
                }
            }
            Ok(())
        })
        .await
    }

    /// Attribute present (and matching, when a matcher is given)
    pub async fn assert_attribute(
        &self,
        target: &Locator,
        name: &str,
        matcher: Option<&Matcher>,
        all: bool,
        timeout: Option<Duration>,
    ) -> E2eResult<()> {
        self.eventually(timeout, move || async move {
            let elements = self.session.query(self.page, target, &[]).await?;
            let assertion = format!("attribute '{}' of {}", name, target);
            let expected = match matcher {
                Some(m) => m.to_string(),
                None => "present".to_string(),
            };
            if elements.is_empty() {
                return Err(E2eError::assertion(assertion, expected, "no matching element"));
            }
            let checked = if all { &elements[..] } else { &elements[..1] };
            for (index, element) in checked.iter().enumerate() {
                let actual = match element.attributes.get(name) {
                    None => Some("missing".to_string()),
                    Some(value) => match matcher {
                        Some(m) if !m.matches(value) => Some(format!("'{}'", value)),
                        _ => None,
                    },
                };
                if let Some(actual) = actual {
                    let actual = if all {
                        format!("{} on element {} of {}", actual, index + 1, elements.len())
                    } else {
                        actual
                    };
                    return Err(E2eError::assertion(assertion, expected, actual));
                }
            }
            Ok(())
        })
        .await
    }

    /// Computed style of the first match, or every match with `all`
    pub async fn assert_computed_style(
        &self,
        target: &Locator,
        property: &str,
        expected: &Matcher,
        all: bool,
        timeout: Option<Duration>,
    ) -> E2eResult<()> {
        let styles = [property.to_string()];
        let styles = &styles;
        self.eventually(timeout, move || async move {
            let elements = self.session.query(self.page, target, styles).await?;
            let assertion = format!("{} of {}", property, target);
            if elements.is_empty() {
                return Err(E2eError::assertion(assertion, expected, "no matching element"));
            }
            let checked = if all { &elements[..] } else { &elements[..1] };
            for (index, element) in checked.iter().enumerate() {
                let value = element.styles.get(property).map(String::as_str).unwrap_or("");
                if !expected.matches(value) {
                    let actual = if all {
                        format!("'{}' on element {} of {}", value, index + 1, elements.len())
                    } else {
                        format!("'{}'", value)
                    };
                    return Err(E2eError::assertion(assertion, expected, actual));
                }
            }
            Ok(())
        })
        .await
    }

    /// Console errors of this page not covered by `filter`
    pub async fn collect_console_errors(&self, filter: &ConsoleFilter) -> E2eResult<Vec<String>> {
        let messages = self.session.console(self.page).await?;
        Ok(filter.errors(&messages))
    }

    pub async fn assert_no_console_errors(&self, filter: &ConsoleFilter) -> E2eResult<()> {
        let errors = self.collect_console_errors(filter).await?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(E2eError::assertion(
                "console errors",
                "none",
                format!("{} error(s): {}", errors.len(), errors.join(" | ")),
            ))
        }
    }

    /// Navigate to `route` and require the navigation alone to reach `wait_until` within `limit`
    ///
    /// The stability window is not part of the measurement.
    pub async fn assert_load_time(
        &self,
        route: &str,
        wait_until: WaitUntil,
        limit: Duration,
    ) -> E2eResult<ObservedPage> {
        let observed = self.load_route_with(route, wait_until, None).await?;
        if observed.load_time_ms >= limit.as_millis() as u64 {
            return Err(E2eError::assertion(
                format!("load time of {}", route),
                format!("under {} ms", limit.as_millis()),
                format!("{} ms", observed.load_time_ms),
            ));
        }
        Ok(observed)
    }

    /// Every cookie in the session must belong to the base URL's host
    pub async fn assert_cookies_scoped(&self) -> E2eResult<Vec<Cookie>> {
        let host = reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| {
                E2eError::assertion("base url host", "a URL with a host", &self.base_url)
            })?;

        let cookies = self.session.cookies().await?;
        let foreign: Vec<String> = cookies
            .iter()
            .filter(|cookie| !cookie_in_scope(&cookie.domain, &host))
            .map(|cookie| format!("{}@{}", cookie.name, cookie.domain))
            .collect();

        if foreign.is_empty() {
            Ok(cookies)
        } else {
            Err(E2eError::assertion(
                "cookie scope",
                format!("cookies for {}", host),
                foreign.join(", "),
            ))
        }
    }
}

/// Domain attribute covers `host` (leading dot optional, subdomains allowed)
fn cookie_in_scope(domain: &str, host: &str) -> bool {
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(".thegraph.foundation", "hub.thegraph.foundation", true ; "parent domain")]
    #[test_case("hub.thegraph.foundation", "hub.thegraph.foundation", true ; "exact host")]
    #[test_case("localhost", "localhost", true ; "localhost")]
    #[test_case("tracker.example.com", "localhost", false ; "third party")]
    #[test_case("graph.foundation", "hub.thegraph.foundation", false ; "suffix but not subdomain")]
    fn test_cookie_scope(domain: &str, host: &str, expected: bool) {
        assert_eq!(cookie_in_scope(domain, host), expected);
    }

    #[test]
    fn test_observed_page_elements_default_empty() {
        let observed = ObservedPage::default();
        assert!(observed.elements(".donut-svg").is_empty());
    }
}
