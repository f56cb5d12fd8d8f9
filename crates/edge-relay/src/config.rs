//! Configuration loading and management

use anyhow::{Context, Result};
use relay_core::{AllowList, AllowListEntry, ServiceConfig, default_allow_list};
use relay_proxy::{RetryPolicy, UpstreamClientConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Route key to upstream base table
    #[serde(default = "default_allow_list")]
    pub allow_list: Vec<AllowListEntry>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Inbound routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Prefixes removed from the inbound path (e.g. a hosting function mount)
    #[serde(default = "default_strip_prefixes")]
    pub strip_prefixes: Vec<String>,
    /// Reject `?url=` targets outside the allow-listed hosts with 403
    #[serde(default)]
    pub strict_legacy_hosts: bool,
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
    /// Forward extra query parameters to path-routed upstreams
    #[serde(default = "default_true")]
    pub forward_query: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strip_prefixes: default_strip_prefixes(),
            strict_legacy_hosts: false,
            default_content_type: default_content_type(),
            forward_query: true,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Upstream HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Entry cap; unbounded when unset
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Background purge interval; 0 disables the sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_strip_prefixes() -> Vec<String> {
    vec!["/.netlify/functions/proxy".to_string()]
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limit_backoff_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!("edge-relay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_ttl_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    ///
    /// A missing file yields the built-in defaults.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        self.build_allow_list()?;
        self.retry_policy().validate()?;

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than 0");
        }
        if self.cache.max_entries == Some(0) {
            anyhow::bail!("cache.max_entries must be greater than 0 when set");
        }
        if self.upstream.request_timeout_secs == 0 {
            anyhow::bail!("upstream.request_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn build_allow_list(&self) -> Result<AllowList> {
        AllowList::new(self.allow_list.clone()).context("Invalid allow_list")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_retry_delay: Duration::from_millis(self.retry.base_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            rate_limit_backoff: Duration::from_millis(self.retry.rate_limit_backoff_ms),
            max_retry_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn client_config(&self) -> UpstreamClientConfig {
        UpstreamClientConfig {
            user_agent: self.upstream.user_agent.clone(),
            request_timeout: Duration::from_secs(self.upstream.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.upstream.connect_timeout_secs),
        }
    }

    pub fn cache_config(&self) -> relay_core::CacheConfig {
        relay_core::CacheConfig {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            max_entries: self.cache.max_entries,
        }
    }

    /// Sweep interval, if the background sweep is enabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.cache.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.cache.sweep_interval_secs))
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            strip_prefixes: self.routing.strip_prefixes.clone(),
            strict_legacy_hosts: self.routing.strict_legacy_hosts,
            default_content_type: self.routing.default_content_type.clone(),
            forward_query: self.routing.forward_query,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            routing: RoutingConfig::default(),
            allow_list: default_allow_list(),
            retry: RetryConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
