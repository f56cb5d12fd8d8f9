//! Edge Relay Upstream Proxy
//!
//! This crate provides the HTTP client used to reach the allow-listed
//! upstream APIs, and the bounded retry/backoff loop wrapped around it.

pub mod client;
pub mod error;
pub mod retry;

pub use client::{Transport, UpstreamClient, UpstreamClientConfig, UpstreamResponse};
pub use error::{FetchError, TransportError};
pub use retry::{RetryPolicy, RetryingFetcher, Sleeper, TokioSleeper, fetch_with_retry};
