//! Catch-all relay route

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use relay_core::{ProxyRequest, ProxyResponse};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /{route}/{tail..} or GET /?url=...
pub async fn relay(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    if method != Method::GET {
        return Err(ApiError::MethodNotAllowed);
    }

    debug!("Relay request: {}", uri);

    let request = ProxyRequest {
        path: uri.path().to_string(),
        query,
    };

    let response = state.service.handle(&request).await;
    into_http_response(response)
}

fn into_http_response(response: ProxyResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(response.status).map_err(|e| {
        ApiError::Internal(format!("invalid upstream status {}: {}", response.status, e))
    })?;

    let mut http_response = (status, Body::from(response.body)).into_response();
    let headers = http_response.headers_mut();

    for (name, value) in &response.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Dropping unrepresentable response header {}: {}", name, value),
        }
    }

    Ok(http_response)
}
