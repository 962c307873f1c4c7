//! Playwright browser automation
//!
//! Each session is a Node.js process running the bundled bridge script,
//! which owns one browser and one context. Requests are multiplexed over
//! the process's stdin/stdout by id.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command as TokioCommand};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use dashprobe_common::config::{BrowserConfig, BrowserKind};
use dashprobe_common::Viewport;

use super::protocol::{EventKind, Incoming, Op, Request, Response};
use super::{
    BrowserSession, ConsoleMessage, Cookie, Driver, ElementSnapshot, LaunchOptions, Locator,
    Navigation, PageId, WaitUntil,
};
use crate::error::{E2eError, E2eResult};

const BRIDGE_SCRIPT: &str = include_str!("../../assets/bridge.js");

/// Extra time granted over the engine-side timeout before giving up on a reply
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Timeout for operations that carry none of their own
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub node_binary: PathBuf,
    pub browser: BrowserKind,
    pub headless: bool,
    pub playwright_module: Option<PathBuf>,
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self::from(&BrowserConfig::default())
    }
}

impl From<&BrowserConfig> for PlaywrightConfig {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            browser: config.browser,
            headless: config.headless,
            playwright_module: config.playwright_module.clone(),
            launch_timeout: Duration::from_millis(config.launch_timeout_ms),
        }
    }
}

/// Launches bridge-backed sessions
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    /// Create a driver, checking that Node.js can be executed
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_node_installed(&config.node_binary)?;
        Ok(Self { config })
    }

    fn check_node_installed(node: &Path) -> E2eResult<()> {
        let status = Command::new(node)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::NodeNotFound(node.display().to_string())),
        }
    }
}

#[async_trait]
impl Driver for PlaywrightDriver {
    fn name(&self) -> &str {
        self.config.browser.as_str()
    }

    async fn launch(&self, options: &LaunchOptions) -> E2eResult<Box<dyn BrowserSession>> {
        let session = BridgeSession::spawn(&self.config, options).await?;
        Ok(Box::new(session))
    }
}

/// Requests awaiting a reply, and whether the bridge can still answer them
#[derive(Default)]
struct Inflight {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    exited: AtomicBool,
}

impl Inflight {
    fn register(&self, id: u64) -> E2eResult<oneshot::Receiver<Response>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        // Checked after inserting: `shut` flags before it clears.
        if self.exited.load(Ordering::SeqCst) {
            self.waiters.lock().remove(&id);
            return Err(bridge_exited());
        }
        Ok(rx)
    }

    fn forget(&self, id: u64) {
        self.waiters.lock().remove(&id);
    }

    fn resolve(&self, response: Response) {
        let waiter = self.waiters.lock().remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Dropping reply to abandoned request {}", response.id),
        }
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Mark the bridge gone; dropping the senders wakes every waiter
    fn shut(&self) {
        self.exited.store(true, Ordering::SeqCst);
        self.waiters.lock().clear();
    }
}

type Pending = Arc<Inflight>;

fn bridge_exited() -> E2eError {
    E2eError::Playwright("bridge exited".into())
}

/// One bridge process: a browser with a single context
pub struct BridgeSession {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicU64,
    closing: AtomicBool,
    closed: AtomicBool,
    main_page: PageId,
    stability_ms: u64,
    _workdir: TempDir,
}

impl BridgeSession {
    async fn spawn(config: &PlaywrightConfig, options: &LaunchOptions) -> E2eResult<Self> {
        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("bridge.js");
        tokio::fs::write(&script_path, BRIDGE_SCRIPT).await?;

        let mut command = TokioCommand::new(&config.node_binary);
        command
            .arg(&script_path)
            .env("DASHPROBE_BROWSER", config.browser.as_str())
            .env("DASHPROBE_HEADLESS", if config.headless { "1" } else { "0" })
            .env("DASHPROBE_VIEWPORT", options.viewport.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(module) = &config.playwright_module {
            command.env("DASHPROBE_PLAYWRIGHT", module);
        }

        debug!(
            "Starting {} bridge: {} {}",
            config.browser.as_str(),
            config.node_binary.display(),
            script_path.display()
        );

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                E2eError::NodeNotFound(config.node_binary.display().to_string())
            } else {
                E2eError::Io(e)
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Protocol("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Protocol("bridge stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::Protocol("bridge stderr unavailable".into()))?;

        let pending: Pending = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(read_responses(stdout, pending.clone(), ready_tx));
        tokio::spawn(forward_stderr(stderr));

        let main_page = match tokio::time::timeout(config.launch_timeout, ready_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(E2eError::Playwright(
                    "bridge exited before the browser was ready".into(),
                ))
            }
            Err(_) => {
                return Err(E2eError::Timeout(format!(
                    "{} launch ({} ms)",
                    config.browser.as_str(),
                    config.launch_timeout.as_millis()
                )))
            }
        };

        info!(
            "Launched {} ({}, viewport {})",
            config.browser.as_str(),
            if config.headless { "headless" } else { "headed" },
            options.viewport
        );

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            main_page,
            stability_ms: millis(options.stability_window),
            _workdir: workdir,
        })
    }

    async fn call(
        &self,
        op: Op,
        page: Option<PageId>,
        params: Value,
        timeout: Duration,
    ) -> E2eResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(E2eError::SessionClosed);
        }
        if self.pending.has_exited() {
            return Err(bridge_exited());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = Request {
            id,
            op,
            page,
            params,
        }
        .to_line()?;

        let rx = self.pending.register(id)?;

        if let Err(e) = self.write_line(&line).await {
            self.pending.forget(id);
            return Err(match e.kind() {
                std::io::ErrorKind::BrokenPipe => E2eError::SessionClosed,
                _ => E2eError::Io(e),
            });
        }

        match tokio::time::timeout(timeout + RESPONSE_GRACE, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) if self.closing.load(Ordering::SeqCst) => Err(E2eError::SessionClosed),
            Ok(Err(_)) => Err(bridge_exited()),
            Err(_) => {
                self.pending.forget(id);
                Err(E2eError::Timeout(format!(
                    "bridge reply to {:?} ({} ms)",
                    op,
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        op: Op,
        page: Option<PageId>,
        params: Value,
        timeout: Duration,
    ) -> E2eResult<T> {
        let value = self.call(op, page, params, timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| E2eError::Protocol(format!("unexpected {:?} result: {}", op, e)))
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    async fn navigate(
        &self,
        op: Op,
        page: PageId,
        params: Value,
        target: &str,
        timeout: Duration,
    ) -> E2eResult<Navigation> {
        let value = self
            .call(op, Some(page), params, timeout)
            .await
            .map_err(|e| match e {
                E2eError::Timeout(_) => E2eError::NavigationTimeout {
                    url: target.to_string(),
                    timeout_ms: millis(timeout),
                },
                other => other,
            })?;
        serde_json::from_value(value)
            .map_err(|e| E2eError::Protocol(format!("unexpected {:?} result: {}", op, e)))
    }

    fn history_params(&self, timeout: Duration) -> Value {
        json!({
            "wait_until": WaitUntil::NetworkIdle,
            "timeout": millis(timeout),
            "stability_ms": self.stability_ms,
        })
    }
}

#[async_trait]
impl BrowserSession for BridgeSession {
    fn main_page(&self) -> PageId {
        self.main_page
    }

    async fn new_page(&self) -> E2eResult<PageId> {
        let value = self
            .call(Op::NewPage, None, json!({}), DEFAULT_OP_TIMEOUT)
            .await?;
        value
            .get("page")
            .and_then(Value::as_u64)
            .and_then(|id| PageId::try_from(id).ok())
            .ok_or_else(|| E2eError::Protocol(format!("new_page returned {}", value)))
    }

    async fn close_page(&self, page: PageId) -> E2eResult<()> {
        self.call(Op::ClosePage, Some(page), json!({}), DEFAULT_OP_TIMEOUT)
            .await
            .map(drop)
    }

    async fn goto(
        &self,
        page: PageId,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> E2eResult<Navigation> {
        let params = json!({
            "url": url,
            "wait_until": wait_until,
            "timeout": millis(timeout),
            "stability_ms": self.stability_ms,
        });
        self.navigate(Op::Goto, page, params, url, timeout).await
    }

    async fn wait_for_load(
        &self,
        page: PageId,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> E2eResult<()> {
        let params = json!({
            "wait_until": wait_until,
            "timeout": millis(timeout),
            "stability_ms": self.stability_ms,
        });
        match self.call(Op::WaitForLoad, Some(page), params, timeout).await {
            Ok(_) => Ok(()),
            Err(E2eError::Timeout(_)) => Err(E2eError::NavigationTimeout {
                url: self.url(page).await.unwrap_or_default(),
                timeout_ms: millis(timeout),
            }),
            Err(e) => Err(e),
        }
    }

    async fn go_back(&self, page: PageId, timeout: Duration) -> E2eResult<Navigation> {
        let params = self.history_params(timeout);
        self.navigate(Op::Back, page, params, "history back", timeout)
            .await
    }

    async fn go_forward(&self, page: PageId, timeout: Duration) -> E2eResult<Navigation> {
        let params = self.history_params(timeout);
        self.navigate(Op::Forward, page, params, "history forward", timeout)
            .await
    }

    async fn reload(&self, page: PageId, timeout: Duration) -> E2eResult<Navigation> {
        let params = self.history_params(timeout);
        self.navigate(Op::Reload, page, params, "reload", timeout)
            .await
    }

    async fn click(&self, page: PageId, target: &Locator, timeout: Duration) -> E2eResult<()> {
        let params = json!({ "locator": target, "timeout": millis(timeout) });
        self.call(Op::Click, Some(page), params, timeout)
            .await
            .map(drop)
    }

    async fn hover(&self, page: PageId, target: &Locator, timeout: Duration) -> E2eResult<()> {
        let params = json!({ "locator": target, "timeout": millis(timeout) });
        self.call(Op::Hover, Some(page), params, timeout)
            .await
            .map(drop)
    }

    async fn set_viewport(&self, page: PageId, viewport: Viewport) -> E2eResult<()> {
        let params = json!({ "width": viewport.width, "height": viewport.height });
        self.call(Op::SetViewport, Some(page), params, DEFAULT_OP_TIMEOUT)
            .await
            .map(drop)
    }

    async fn url(&self, page: PageId) -> E2eResult<String> {
        self.call_as(Op::Url, Some(page), json!({}), DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn title(&self, page: PageId) -> E2eResult<String> {
        self.call_as(Op::Title, Some(page), json!({}), DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn content(&self, page: PageId) -> E2eResult<String> {
        self.call_as(Op::Content, Some(page), json!({}), DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn query(
        &self,
        page: PageId,
        target: &Locator,
        styles: &[String],
    ) -> E2eResult<Vec<ElementSnapshot>> {
        let params = json!({ "locator": target, "styles": styles });
        self.call_as(Op::Query, Some(page), params, DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn evaluate(&self, page: PageId, expression: &str) -> E2eResult<Value> {
        let params = json!({ "expression": expression });
        self.call(Op::Evaluate, Some(page), params, DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn console(&self, page: PageId) -> E2eResult<Vec<ConsoleMessage>> {
        self.call_as(Op::Console, Some(page), json!({}), DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn cookies(&self) -> E2eResult<Vec<Cookie>> {
        self.call_as(Op::Cookies, None, json!({}), DEFAULT_OP_TIMEOUT)
            .await
    }

    async fn screenshot(&self, page: PageId, path: &Path, full_page: bool) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let params = json!({ "path": path.to_string_lossy(), "full_page": full_page });
        self.call(Op::Screenshot, Some(page), params, DEFAULT_OP_TIMEOUT)
            .await
            .map(drop)
    }

    async fn close(&self) -> E2eResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.call(Op::Close, None, json!({}), CLOSE_TIMEOUT).await;
        self.closed.store(true, Ordering::SeqCst);

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!("Bridge exited: {}", status),
                Ok(Err(e)) => warn!("Failed to reap bridge: {}", e),
                Err(_) => {
                    warn!("Bridge did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill bridge: {}", e);
                    }
                }
            }
        }

        match result {
            Ok(_) | Err(E2eError::SessionClosed) => Ok(()),
            Err(_) if self.pending.has_exited() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn read_responses<R>(
    stdout: R,
    pending: Pending,
    ready: oneshot::Sender<E2eResult<PageId>>,
) where
    R: AsyncRead + Unpin,
{
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from bridge: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Incoming::parse(&line) {
            Ok(Incoming::Response(response)) => pending.resolve(response),
            Ok(Incoming::Event(event)) => match event.event {
                EventKind::Ready => {
                    let page = event
                        .data
                        .get("page")
                        .and_then(Value::as_u64)
                        .and_then(|id| PageId::try_from(id).ok())
                        .unwrap_or(0);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(page));
                    }
                }
                EventKind::Fatal => {
                    let message = event.message();
                    error!("Bridge failed: {}", message);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(E2eError::Playwright(message)));
                    }
                }
                EventKind::ProtocolError => {
                    warn!("Bridge rejected a request: {}", event.message())
                }
                EventKind::Unknown => debug!("Ignoring bridge event: {:?}", event),
            },
            Err(e) => debug!("{}", e),
        }
    }

    pending.shut();
    debug!("Bridge stdout closed");
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "dashprobe::bridge", "{}", line);
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
