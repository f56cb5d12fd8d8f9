//! Relay service handling the inbound request cycle

use bytes::Bytes;
use relay_proxy::{FetchError, RetryingFetcher, UpstreamResponse};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::ResponseCache;
use crate::router::{RouteResolver, RouteSource, append_query};

/// Query parameter carrying a full upstream URL (legacy form)
pub const LEGACY_URL_PARAM: &str = "url";

const ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
const CONTENT_TYPE: &str = "Content-Type";
const INVALID_TARGET: &str = "Error: Missing or invalid upstream API URL.";

fn is_http_target(target: &str) -> bool {
    Url::parse(target).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Inbound request descriptor
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub path: String,
    pub query: HashMap<String, String>,
}

impl ProxyRequest {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            query: HashMap::new(),
        }
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }
}

/// Outbound response descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl ProxyResponse {
    fn new(status: u16, content_type: &str, body: Bytes) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(ALLOW_ORIGIN.to_string(), "*".to_string());
        headers.insert(CONTENT_TYPE.to_string(), content_type.to_string());
        Self {
            status,
            headers,
            body,
        }
    }

    fn text(status: u16, message: String) -> Self {
        Self::new(status, "text/plain", Bytes::from(message))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }
}

/// Request handling options
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Routing prefixes removed from the inbound path before resolution
    pub strip_prefixes: Vec<String>,
    /// Reject legacy `url` targets whose host is not an allow-listed base
    pub strict_legacy_hosts: bool,
    /// Content type used when the upstream does not send one
    pub default_content_type: String,
    /// Forward the remaining query parameters to path-routed upstreams
    pub forward_query: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            strip_prefixes: vec!["/.netlify/functions/proxy".to_string()],
            strict_legacy_hosts: false,
            default_content_type: "text/plain".to_string(),
            forward_query: true,
        }
    }
}

/// Relay service: resolve, consult the cache, fetch, store, respond
pub struct ProxyService {
    resolver: RouteResolver,
    cache: Arc<ResponseCache>,
    fetcher: RetryingFetcher,
    config: ServiceConfig,
}

impl ProxyService {
    /// Create a new relay service
    pub fn new(
        resolver: RouteResolver,
        cache: Arc<ResponseCache>,
        fetcher: RetryingFetcher,
        config: ServiceConfig,
    ) -> Self {
        Self {
            resolver,
            cache,
            fetcher,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Handle one inbound request
    ///
    /// Never fails: every outcome is turned into a response.
    pub async fn handle(&self, request: &ProxyRequest) -> ProxyResponse {
        let path = self.strip_prefix(&request.path);
        let legacy = request.query.get(LEGACY_URL_PARAM).map(String::as_str);

        let resolved = match self.resolver.resolve(path, legacy) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Rejecting {}: {}", request.path, e);
                return self.reject(400, "invalid_route", format!("Error: {}.", e));
            }
        };

        let target = match resolved.source {
            RouteSource::Path { .. } if self.config.forward_query => append_query(
                &resolved.upstream_url,
                request
                    .query
                    .iter()
                    .filter(|(k, _)| k.as_str() != LEGACY_URL_PARAM)
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            ),
            _ => resolved.upstream_url,
        };

        if !is_http_target(&target) {
            debug!("Rejecting non-http target: {}", target);
            return self.reject(400, "invalid_target", INVALID_TARGET.to_string());
        }

        if self.config.strict_legacy_hosts
            && resolved.source == RouteSource::LegacyQuery
            && !self.resolver.allow_list().permits_url(&target)
        {
            warn!("Rejecting legacy target outside the allow-list: {}", target);
            return self.reject(
                403,
                "forbidden_host",
                "Error: Upstream host is not allowed.".to_string(),
            );
        }

        if let Some(entry) = self.cache.lookup(&target) {
            metrics::counter!("relay_requests_total", "outcome" => "cache_hit").increment(1);
            return self.respond(entry.status, entry.content_type.as_deref(), entry.body.clone());
        }

        match self.fetcher.fetch(&target).await {
            Ok(response) => {
                if response.is_success() {
                    self.cache.store(&target, response.clone());
                } else {
                    info!("Passing through upstream status {} for {}", response.status, target);
                }
                metrics::counter!("relay_requests_total", "outcome" => "fetched").increment(1);
                let UpstreamResponse {
                    status,
                    body,
                    content_type,
                } = response;
                self.respond(status, content_type.as_deref(), body)
            }
            Err(e @ FetchError::Exhausted { .. }) => {
                error!("Upstream exhausted for {}: {}", target, e);
                self.reject(503, "exhausted", format!("Proxy Error: {}", e))
            }
            Err(e) => {
                error!("Proxy fault for {}: {}", target, e);
                self.reject(500, "internal_error", format!("Proxy Error: {}", e))
            }
        }
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        self.config
            .strip_prefixes
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .find_map(|prefix| {
                path.strip_prefix(prefix.as_str())
                    .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .unwrap_or(path)
    }

    fn respond(&self, status: u16, content_type: Option<&str>, body: Bytes) -> ProxyResponse {
        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or(&self.config.default_content_type);
        ProxyResponse::new(status, content_type, body)
    }

    fn reject(&self, status: u16, outcome: &'static str, message: String) -> ProxyResponse {
        metrics::counter!("relay_requests_total", "outcome" => outcome).increment(1);
        ProxyResponse::text(status, message)
    }
}
