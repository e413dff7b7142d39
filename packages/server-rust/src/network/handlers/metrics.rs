//! Prometheus exposition endpoint.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use super::AppState;
use crate::service::ServerMetrics;

/// Renders the server's metrics registry in Prometheus text format.
///
/// Returns 404 when metrics are disabled or the registry is not
/// Prometheus-backed.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref().and_then(ServerMetrics::render) {
        Some(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
