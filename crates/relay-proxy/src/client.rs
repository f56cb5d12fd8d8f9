//! Upstream HTTP client

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{FetchError, TransportError};

/// A response received from an upstream API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: content_type.map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS.as_u16()
    }
}

/// Issues a single GET against an upstream URL
///
/// Any received HTTP response, whatever its status, is `Ok`. Only failures
/// that prevent a response from being read are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<UpstreamResponse, TransportError>;
}

/// Upstream client configuration
#[derive(Clone, Debug)]
pub struct UpstreamClientConfig {
    /// Descriptive client identifier sent as `User-Agent`
    pub user_agent: String,
    /// Per-attempt timeout covering the whole request
    pub request_timeout: Duration,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("edge-relay/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// reqwest-backed transport
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(config: UpstreamClientConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!(
            "Created upstream client (user agent: {}, timeout: {:?})",
            config.user_agent, config.request_timeout
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for UpstreamClient {
    async fn get(&self, url: &str) -> Result<UpstreamResponse, TransportError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await?;

        Ok(UpstreamResponse {
            status,
            body,
            content_type,
        })
    }
}
