//! Application state

use relay_core::ProxyService;
use std::sync::Arc;

/// Prometheus handle used to render `/metrics`
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ProxyService>,
}

impl AppState {
    pub fn new(service: Arc<ProxyService>) -> Self {
        Self { service }
    }
}
