//! Route resolution
//!
//! Maps an inbound path (or the legacy `url` query parameter) to the
//! upstream URL it should be forwarded to.

use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::AllowList;
use crate::error::ResolutionError;

/// How the upstream URL was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSource {
    /// Matched an allow-list route key
    Path { key: String },
    /// Taken verbatim from the `url` query parameter
    LegacyQuery,
}

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub upstream_url: String,
    pub source: RouteSource,
}

/// Resolves inbound requests against the allow-list
#[derive(Debug, Clone)]
pub struct RouteResolver {
    allow_list: Arc<AllowList>,
}

impl RouteResolver {
    pub fn new(allow_list: Arc<AllowList>) -> Self {
        Self { allow_list }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Resolve a request to its upstream URL
    ///
    /// A non-empty `legacy_query_url` takes precedence and is returned
    /// verbatim; the caller is responsible for validating it further.
    pub fn resolve(
        &self,
        inbound_path: &str,
        legacy_query_url: Option<&str>,
    ) -> Result<ResolvedRequest, ResolutionError> {
        if let Some(raw) = legacy_query_url.filter(|u| !u.is_empty()) {
            Url::parse(raw).map_err(|_| ResolutionError::MalformedLegacyUrl(raw.to_string()))?;
            debug!("Resolved legacy query URL: {}", raw);
            return Ok(ResolvedRequest {
                upstream_url: raw.to_string(),
                source: RouteSource::LegacyQuery,
            });
        }

        let mut segments = inbound_path.split('/').filter(|s| !s.is_empty());
        let key = segments.next().ok_or(ResolutionError::EmptyPath)?;

        let entry = self
            .allow_list
            .get(key)
            .ok_or_else(|| ResolutionError::UnknownBase(key.to_string()))?;

        let mut tail: Vec<&str> = segments.collect();
        if tail.first().is_some_and(|first| entry.strips(first)) {
            tail.remove(0);
        }

        let upstream_url = format!("{}/{}", entry.base, tail.join("/"));
        debug!("Resolved route '{}' to {}", key, upstream_url);

        Ok(ResolvedRequest {
            upstream_url,
            source: RouteSource::Path {
                key: key.to_string(),
            },
        })
    }
}

/// Append forwarded query parameters to a resolved URL
///
/// Parameters are sorted by name so equivalent requests share a cache key.
pub fn append_query<'a>(url: &str, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut params: Vec<(&str, &str)> = params.into_iter().collect();
    if params.is_empty() {
        return url.to_string();
    }
    params.sort();

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();

    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}
