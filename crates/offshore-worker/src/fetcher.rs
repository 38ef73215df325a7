//! Network backend.
//!
//! Strategies reach the network through the [`Fetcher`] trait so they can
//! be exercised against scripted fakes. [`HttpFetcher`] is the real,
//! reqwest-backed implementation.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::request::{FetchRequest, FetchResponse};
use crate::WorkerError;

// ==================== Fetcher trait ====================

/// Asynchronous network seam.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request against the live network.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, WorkerError>;
}

// ==================== HTTP fetcher ====================

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("offshore/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
        }
    }
}

/// Reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client from the configuration.
    pub fn new(config: FetcherConfig) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .build()
            .map_err(|e| WorkerError::Fetch(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HTTP fetcher initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, WorkerError> {
        debug!(method = %request.method, url = %request.url, "fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WorkerError::Fetch(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| WorkerError::Fetch(e.to_string()))?;

        trace!(url = %request.url, status = %status, body_len = body.len(), "response received");

        Ok(FetchResponse::network(status, headers, body))
    }
}

// ==================== Test fake ====================

#[cfg(test)]
pub(crate) use fake::FakeFetcher;
