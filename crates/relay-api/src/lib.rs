//! Edge Relay HTTP API
//!
//! This crate provides the Axum-based HTTP surface for Edge Relay:
//! the catch-all relay route plus health and metrics endpoints.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
