//! Cross-cutting middleware: request ids, request counters and CORS

use super::monitoring::MetricsRegistry;
use super::server::AppState;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, ExposeHeaders};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// CORS policy from configured origins; `*` (or nothing) means open.
pub fn create_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    if allowed_origins.is_empty() || allowed_origins.contains(&"*".to_string()) {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(ExposeHeaders::list([HeaderName::from_static(
                REQUEST_ID_HEADER,
            )]))
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origins
                    .into_iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
            ])
            .allow_headers(Any)
            .expose_headers(ExposeHeaders::list([HeaderName::from_static(
                REQUEST_ID_HEADER,
            )]))
    }
}

/// Attach a request id (client-provided or fresh) to the request extensions
/// and echo it on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Count every request, and every response that left as an error.
pub async fn track_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    MetricsRegistry::incr(&state.metrics.http_requests_total);
    let response = next.run(request).await;
    if counts_as_error(response.status()) {
        MetricsRegistry::incr(&state.metrics.errors_total);
    }
    response
}

fn counts_as_error(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

/// Request id wrapper for extraction in handlers.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);
