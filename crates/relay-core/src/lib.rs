//! Edge Relay Core Business Logic
//!
//! This crate provides the core functionality for Edge Relay:
//! allow-list routing, the short-lived response cache and the
//! request handler tying them to the retrying upstream fetcher.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod router;
pub mod service;

pub use cache::{CacheConfig, CacheEntry, CacheStats, ResponseCache, spawn_sweep_task};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AllowList, AllowListEntry, default_allow_list, validate_key};
pub use error::{CoreError, ResolutionError};
pub use router::{ResolvedRequest, RouteResolver, RouteSource, append_query};
pub use service::{ProxyRequest, ProxyResponse, ProxyService, ServiceConfig};
