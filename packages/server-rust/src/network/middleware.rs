//! HTTP middleware stack for the RPC transport.
//!
//! Layer ordering follows the outer-to-inner convention: the first layer
//! listed processes the request first and the response last.

use axum::http::header::HeaderName;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::config::TransportParams;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Applies the HTTP-level layers to `router`.
///
/// **Ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `x-request-id` when the caller sent none
/// 2. `Tracing` -- request/response trace spans
/// 3. `PropagateRequestId` -- copies `x-request-id` onto the response
/// 4. `RequestBodyLimit` -- only when `max_request_bytes` is set
///
/// Call-level concerns (metrics, recovery, ...) live in the interceptor
/// pipeline, not here.
pub fn apply_http_layers<S>(router: Router<S>, params: &TransportParams) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let router = match params.max_request_bytes {
        Some(limit) => router.layer(RequestBodyLimitLayer::new(limit)),
        None => router,
    };

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    )
}
