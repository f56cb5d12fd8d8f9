//! Proxy error types

use thiserror::Error;

/// Failure of a single upstream call, before any response was received
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS, timeout or send failure; worth another attempt
    #[error("network error: {0}")]
    Network(String),

    /// The request could not be built or its response could not be read
    #[error("transport fault: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_decode() || e.is_redirect() {
            TransportError::Fatal(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("upstream unreachable after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },

    #[error("{0}")]
    Transport(TransportError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
}
