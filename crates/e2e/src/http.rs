//! Direct HTTP checks against the deployment

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use dashprobe_common::config::resolve_url;

use crate::error::{E2eError, E2eResult};
use crate::matcher::{excerpt, Matcher};

/// Response of a plain GET (redirects followed)
#[derive(Debug, Clone, Serialize)]
pub struct HttpResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
    pub elapsed_ms: u64,
}

/// Outcome of one route in a health sweep
#[derive(Debug, Clone, Serialize)]
pub struct RouteHealth {
    pub route: String,
    pub url: String,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub healthy: bool,
    pub error: Option<String>,
}

/// HTTP client bound to a base URL
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dashprobe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn url_for(&self, route: &str) -> String {
        resolve_url(&self.base_url, route)
    }

    pub async fn get(&self, route: &str) -> E2eResult<HttpResponse> {
        let url = self.url_for(route);
        let start = Instant::now();
        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!("GET {} -> {} ({} ms)", url, status, elapsed_ms);

        Ok(HttpResponse {
            url: final_url,
            status,
            body,
            elapsed_ms,
        })
    }

    /// `GET route` must answer `expected`
    pub async fn assert_status(&self, route: &str, expected: u16) -> E2eResult<HttpResponse> {
        let response = self.get(route).await?;
        if response.status != expected {
            return Err(E2eError::HttpStatusMismatch {
                url: self.url_for(route),
                expected,
                actual: response.status,
            });
        }
        Ok(response)
    }

    /// `GET route` must answer `status` with a body satisfying `matcher`
    pub async fn assert_body(
        &self,
        route: &str,
        status: u16,
        matcher: &Matcher,
    ) -> E2eResult<HttpResponse> {
        let response = self.assert_status(route, status).await?;
        if !matcher.matches(&response.body) {
            return Err(E2eError::assertion(
                format!("body of GET {}", route),
                matcher,
                excerpt(&response.body, 120),
            ));
        }
        Ok(response)
    }

    /// Poll a route until it answers with a success status
    pub async fn wait_until_healthy(&self, route: &str, timeout: Duration) -> E2eResult<()> {
        let url = self.url_for(route);
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("{} is healthy", url);
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} ...", url);
                    }
                    // Connection refused is expected while the deployment comes up
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(250)).await;
        }

        Err(E2eError::Timeout(format!(
            "{} to become healthy ({} attempts)",
            url, attempts
        )))
    }

    /// GET every route once; failures are recorded, not raised
    pub async fn sweep(&self, routes: &[String]) -> Vec<RouteHealth> {
        let checks = routes.iter().map(|route| async move {
            let url = self.url_for(route);
            match self.get(route).await {
                Ok(response) => RouteHealth {
                    route: route.clone(),
                    url,
                    status: Some(response.status),
                    elapsed_ms: response.elapsed_ms,
                    healthy: (200..300).contains(&response.status),
                    error: None,
                },
                Err(e) => RouteHealth {
                    route: route.clone(),
                    url,
                    status: None,
                    elapsed_ms: 0,
                    healthy: false,
                    error: Some(e.to_string()),
                },
            }
        });
        futures::future::join_all(checks).await
    }
}
