//! Network access for the worker.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, SwError};
use crate::request::{Request, Response};

/// Performs network requests on behalf of the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. HTTP error statuses are responses, not errors.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

// ==================== HTTP ====================

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Per-request timeout. `None` waits for as long as the server takes.
    pub timeout: Option<Duration>,
    /// User agent string.
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: format!("DemoPWA-ServiceWorker/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Fetcher backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let redirected = url != request.url;
        let body = response.bytes().await?;

        trace!(url = %url, status = status.as_u16(), bytes = body.len(), "Fetched resource");

        Ok(Response {
            url: Some(url),
            status,
            headers,
            body,
            redirected,
        })
    }
}

// ==================== Static ====================

/// Serves canned responses by URL. Unknown URLs fail like an offline network.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, Response>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    pub fn with_response(mut self, url: &str, response: Response) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    /// Total number of fetches, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of fetches for one URL.
    pub fn calls_for(&self, url: &str) -> usize {
        self.requested
            .lock()
            .map(|r| r.iter().filter(|u| *u == url).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(request.url.to_string());
        }

        match self.responses.get(request.url.as_str()) {
            Some(response) => {
                let mut response = response.clone();
                if response.url.is_none() {
                    response.url = Some(request.url.clone());
                }
                Ok(response)
            }
            None => Err(SwError::network(format!(
                "Failed to fetch {}",
                request.url
            ))),
        }
    }
}
