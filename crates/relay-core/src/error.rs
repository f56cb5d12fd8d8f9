//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Proxy error: {0}")]
    Proxy(#[from] relay_proxy::FetchError),
}

/// Why an inbound request could not be mapped to an upstream URL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Missing upstream API route")]
    EmptyPath,

    #[error("Unknown upstream API base: {0}")]
    UnknownBase(String),

    #[error("Malformed upstream API URL: {0}")]
    MalformedLegacyUrl(String),
}
