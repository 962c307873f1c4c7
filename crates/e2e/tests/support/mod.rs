//! In-memory browser used by the integration tests
//!
//! A [`FakeSite`] maps paths to canned pages. Sessions keep per-page
//! history so back/forward/reload behave like a browser tab.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashprobe_common::Viewport;
use dashprobe_e2e::driver::{
    BrowserSession, ConsoleMessage, Cookie, Driver, ElementSnapshot, LaunchOptions, Locator,
    Navigation, PageId, WaitUntil,
};
use dashprobe_e2e::{E2eError, E2eResult};

pub const BASE_URL: &str = "http://dash.test";

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub title: String,
    pub status: u16,
    pub body: String,
    pub elements: HashMap<String, Vec<ElementSnapshot>>,
    /// Selector -> path navigated to on click
    pub links: HashMap<String, String>,
    pub console: Vec<ConsoleMessage>,
    /// Takes this long to settle
    pub load_delay: Duration,
    /// Extra time before the network goes quiet after `load`
    pub idle_delay: Duration,
    /// Selectors whose query kills the browser
    pub crashes: Vec<String>,
}

impl FakePage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            status: 200,
            body: title.to_string(),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn element(mut self, selector: &str, element: ElementSnapshot) -> Self {
        self.elements
            .entry(selector.to_string())
            .or_default()
            .push(element);
        self
    }

    pub fn link(mut self, selector: &str, path: &str) -> Self {
        self.links.insert(selector.to_string(), path.to_string());
        self
    }

    pub fn console_error(mut self, text: &str) -> Self {
        self.console.push(ConsoleMessage::error(text));
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn crash_on(mut self, selector: &str) -> Self {
        self.crashes.push(selector.to_string());
        self
    }
}

pub fn element(text: &str) -> ElementSnapshot {
    ElementSnapshot {
        text: text.to_string(),
        visible: true,
        ..Default::default()
    }
}

pub fn styled(text: &str, styles: &[(&str, &str)]) -> ElementSnapshot {
    let mut snapshot = element(text);
    snapshot.styles = styles
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    snapshot
}

pub fn with_attribute(mut snapshot: ElementSnapshot, name: &str, value: &str) -> ElementSnapshot {
    snapshot.attributes.insert(name.to_string(), value.to_string());
    snapshot
}

#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    pub pages: HashMap<String, FakePage>,
    pub redirects: HashMap<String, String>,
    pub cookies: Vec<Cookie>,
}

impl FakeSite {
    pub fn page(mut self, path: &str, page: FakePage) -> Self {
        self.pages.insert(path.to_string(), page);
        self
    }

    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub fn cookie(mut self, name: &str, domain: &str) -> Self {
        self.cookies.push(Cookie {
            name: name.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
        });
        self
    }

    fn resolve(&self, path: &str) -> (String, Option<&FakePage>) {
        let path = self.redirects.get(path).cloned().unwrap_or_else(|| path.to_string());
        let lookup = path.split('#').next().unwrap_or(&path).to_string();
        let page = self.pages.get(&lookup);
        (path, page)
    }
}

/// Counts launches and closes; session N uses `sites[min(N, len - 1)]`
#[derive(Default)]
pub struct FakeDriver {
    sites: Vec<Arc<FakeSite>>,
    pub launches: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub viewports: Mutex<Vec<Viewport>>,
}

impl FakeDriver {
    pub fn new(site: FakeSite) -> Self {
        Self::sequence(vec![site])
    }

    pub fn sequence(sites: Vec<FakeSite>) -> Self {
        Self {
            sites: sites.into_iter().map(Arc::new).collect(),
            ..Default::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch(&self, options: &LaunchOptions) -> E2eResult<Box<dyn BrowserSession>> {
        let index = self.launches.fetch_add(1, Ordering::SeqCst);
        let site = self
            .sites
            .get(index)
            .or_else(|| self.sites.last())
            .cloned()
            .ok_or_else(|| E2eError::Playwright("no site configured".to_string()))?;
        self.viewports.lock().push(options.viewport);

        let mut tabs = HashMap::new();
        tabs.insert(0, Tab::default());
        Ok(Box::new(FakeSession {
            site,
            tabs: Mutex::new(tabs),
            next_page: AtomicU32::new(1),
            closes: self.closes.clone(),
            closed: Mutex::new(false),
        }))
    }
}

#[derive(Debug, Default)]
struct Tab {
    history: Vec<String>,
    index: usize,
}

impl Tab {
    fn current(&self) -> Option<&str> {
        self.history.get(self.index).map(String::as_str)
    }
}

pub struct FakeSession {
    site: Arc<FakeSite>,
    tabs: Mutex<HashMap<PageId, Tab>>,
    next_page: AtomicU32,
    closes: Arc<AtomicUsize>,
    closed: Mutex<bool>,
}

impl FakeSession {
    fn path_of(url: &str) -> String {
        let path = url.strip_prefix(BASE_URL).unwrap_or(url);
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }
    }

    fn current(&self, page: PageId) -> E2eResult<(String, Option<FakePage>)> {
        let tabs = self.tabs.lock();
        let tab = tabs.get(&page).ok_or(E2eError::SessionClosed)?;
        let path = tab.current().unwrap_or("about:blank").to_string();
        let (_, found) = self.site.resolve(&path);
        Ok((path, found.cloned()))
    }

    async fn visit(
        &self,
        page: PageId,
        path: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> E2eResult<Navigation> {
        let (final_path, found) = self.site.resolve(path);
        let mut delay = found.map(|p| p.load_delay).unwrap_or_default();
        if wait_until == WaitUntil::NetworkIdle {
            delay += found.map(|p| p.idle_delay).unwrap_or_default();
        }
        if delay > timeout {
            return Err(E2eError::Timeout(format!("{} took {:?}", path, delay)));
        }
        tokio::time::sleep(delay).await;

        let status = found.map(|p| p.status).unwrap_or(404);
        let mut tabs = self.tabs.lock();
        let tab = tabs.get_mut(&page).ok_or(E2eError::SessionClosed)?;
        if !tab.history.is_empty() {
            tab.history.truncate(tab.index + 1);
        }
        tab.history.push(final_path.clone());
        tab.index = tab.history.len() - 1;
        Ok(Navigation {
            url: format!("{}{}", BASE_URL, final_path),
            status: Some(status),
        })
    }

    fn step(&self, page: PageId, delta: isize) -> E2eResult<Navigation> {
        let mut tabs = self.tabs.lock();
        let tab = tabs.get_mut(&page).ok_or(E2eError::SessionClosed)?;
        let target = tab.index as isize + delta;
        if target >= 0 && (target as usize) < tab.history.len() {
            tab.index = target as usize;
        }
        let path = tab.current().unwrap_or("about:blank").to_string();
        let status = self.site.resolve(&path).1.map(|p| p.status);
        Ok(Navigation {
            url: format!("{}{}", BASE_URL, path),
            status,
        })
    }
}

fn select(page: &FakePage, target: &Locator) -> Vec<ElementSnapshot> {
    let mut matches: Vec<ElementSnapshot> = page
        .elements
        .get(&target.selector)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|e| match &target.has_text {
            Some(text) => e.text.contains(text.as_str()),
            None => true,
        })
        .collect();
    if let Some(nth) = target.nth {
        matches = matches.into_iter().skip(nth).take(1).collect();
    }
    matches
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn main_page(&self) -> PageId {
        0
    }

    async fn new_page(&self) -> E2eResult<PageId> {
        let page = self.next_page.fetch_add(1, Ordering::SeqCst);
        self.tabs.lock().insert(page, Tab::default());
        Ok(page)
    }

    async fn close_page(&self, page: PageId) -> E2eResult<()> {
        self.tabs.lock().remove(&page);
        Ok(())
    }

    async fn goto(
        &self,
        page: PageId,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> E2eResult<Navigation> {
        self.visit(page, &Self::path_of(url), wait_until, timeout)
            .await
            .map_err(|_| E2eError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    async fn wait_for_load(
        &self,
        _page: PageId,
        _wait_until: WaitUntil,
        _timeout: Duration,
    ) -> E2eResult<()> {
        Ok(())
    }

    async fn go_back(&self, page: PageId, _timeout: Duration) -> E2eResult<Navigation> {
        self.step(page, -1)
    }

    async fn go_forward(&self, page: PageId, _timeout: Duration) -> E2eResult<Navigation> {
        self.step(page, 1)
    }

    async fn reload(&self, page: PageId, _timeout: Duration) -> E2eResult<Navigation> {
        self.step(page, 0)
    }

    async fn click(&self, page: PageId, target: &Locator, timeout: Duration) -> E2eResult<()> {
        let (_, current) = self.current(page)?;
        let href = current
            .and_then(|p| p.links.get(&target.selector).cloned())
            .ok_or_else(|| E2eError::Timeout(format!("clickable {}", target)))?;
        self.visit(page, &href, WaitUntil::Load, timeout).await.map(drop)
    }

    async fn hover(&self, page: PageId, target: &Locator, _timeout: Duration) -> E2eResult<()> {
        let (_, current) = self.current(page)?;
        match current {
            Some(p) if !select(&p, target).is_empty() => Ok(()),
            _ => Err(E2eError::Timeout(format!("hoverable {}", target))),
        }
    }

    async fn set_viewport(&self, _page: PageId, _viewport: Viewport) -> E2eResult<()> {
        Ok(())
    }

    async fn url(&self, page: PageId) -> E2eResult<String> {
        let (path, _) = self.current(page)?;
        Ok(format!("{}{}", BASE_URL, path))
    }

    async fn title(&self, page: PageId) -> E2eResult<String> {
        Ok(self.current(page)?.1.map(|p| p.title).unwrap_or_default())
    }

    async fn content(&self, page: PageId) -> E2eResult<String> {
        Ok(self.current(page)?.1.map(|p| p.body).unwrap_or_default())
    }

    async fn query(
        &self,
        page: PageId,
        target: &Locator,
        _styles: &[String],
    ) -> E2eResult<Vec<ElementSnapshot>> {
        let (_, current) = self.current(page)?;
        if current
            .as_ref()
            .is_some_and(|p| p.crashes.contains(&target.selector))
        {
            return Err(E2eError::Playwright("bridge exited".to_string()));
        }
        let mut found = current.map(|p| select(&p, target)).unwrap_or_default();
        if found.is_empty() && target.selector == "body" {
            let body = self.content(page).await?;
            found.push(element(&body));
        }
        Ok(found)
    }

    async fn evaluate(&self, _page: PageId, _expression: &str) -> E2eResult<serde_json::Value> {
        Ok(serde_json::Value::Array(Vec::new()))
    }

    async fn console(&self, page: PageId) -> E2eResult<Vec<ConsoleMessage>> {
        Ok(self.current(page)?.1.map(|p| p.console).unwrap_or_default())
    }

    async fn cookies(&self) -> E2eResult<Vec<Cookie>> {
        Ok(self.site.cookies.clone())
    }

    async fn screenshot(&self, _page: PageId, path: &Path, _full_page: bool) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"fake png")?;
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
