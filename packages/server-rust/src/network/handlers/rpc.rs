//! Unary call endpoint: `POST /{package.Service}/{Method}` with a JSON body.
//!
//! Decodes the HTTP request into a `UnaryCall`, runs it through the
//! interceptor pipeline, and encodes the result. Errors are returned with an
//! HTTP status derived from their code, an `rpc-status` header and a
//! `{code, message}` JSON body.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, FromRequest, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use callchain_core::{CallContext, CallError, Code, Metadata, MethodName};
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing::debug;

use super::AppState;
use crate::service::UnaryCall;

/// Response header carrying the call's status code name.
pub const RPC_STATUS_HEADER: &str = "rpc-status";
/// Optional request header: call deadline in milliseconds from receipt.
pub const TIMEOUT_HEADER: &str = "rpc-timeout-ms";

/// Dispatches one unary call through the pipeline.
pub async fn rpc_handler(State(state): State<AppState>, request: Request) -> Response {
    // Taken before the state check so a drain cannot miss this call.
    let _guard = state.lifecycle.in_flight_guard();
    if !state.lifecycle.accepting() {
        return error_response(&CallError::Unavailable);
    }

    let received = Instant::now();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let headers = request.headers().clone();

    let method = match MethodName::parse(request.uri().path()) {
        Ok(method) => method,
        Err(err) => return error_response(&err),
    };

    let body = match Bytes::from_request(request, &state).await {
        Ok(body) => body,
        Err(rejection) => return rejection.into_response(),
    };
    let payload = match decode_body(&body) {
        Ok(payload) => payload,
        Err(err) => return error_response(&err),
    };

    let call_id = state.call_ids.fetch_add(1, Ordering::Relaxed) + 1;
    let mut ctx = CallContext::new(call_id, method).with_metadata(metadata_from(&headers));
    if let Some(peer) = peer {
        ctx = ctx.with_peer(peer);
    }
    let deadline = match timeout_from(&headers) {
        Ok(timeout) => timeout.map(|t| received + t),
        Err(err) => return error_response(&err),
    };
    if let Some(deadline) = deadline {
        ctx = ctx.with_deadline(deadline);
    }

    // The deadline travels in the context; the method router enforces it
    // beneath the interceptors.
    debug!(call_id, method = %ctx.method, "dispatching call");
    let result = state
        .service
        .clone()
        .oneshot(UnaryCall::new(ctx, payload))
        .await;

    match result {
        Ok(response) => (
            StatusCode::OK,
            [(RPC_STATUS_HEADER, HeaderValue::from_static(Code::Ok.as_str()))],
            Json(response),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

/// Empty bodies decode as `null`.
fn decode_body(body: &[u8]) -> Result<Value, CallError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| CallError::invalid_argument(format!("invalid JSON body: {e}")))
}

/// Copies every header with a textual value into call metadata.
fn metadata_from(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

fn timeout_from(headers: &HeaderMap) -> Result<Option<Duration>, CallError> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|ms| Some(Duration::from_millis(ms)))
        .ok_or_else(|| CallError::invalid_argument(format!("malformed {TIMEOUT_HEADER} header")))
}

/// HTTP status used to report `code`.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Encodes a call error as an HTTP response.
#[must_use]
pub fn error_response(err: &CallError) -> Response {
    let code = err.code();
    (
        http_status(code),
        [(RPC_STATUS_HEADER, HeaderValue::from_static(code.as_str()))],
        Json(json!({ "code": code, "message": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use callchain_core::CallResult;

    use tower::Layer;

    use super::*;
    use crate::network::LifecycleController;
    use crate::service::interceptor::MetricsLayer;
    use crate::service::{CallService, MethodRouter, ServerMetrics};

    async fn say_hello(ctx: CallContext, req: Value) -> CallResult {
        let name = req["name"].as_str().unwrap_or("stranger").to_string();
        Ok(json!({
            "message": format!("Hello {name}"),
            "call_id": ctx.call_id,
            "user_agent": ctx.metadata.get("user-agent"),
            "has_deadline": ctx.deadline.is_some(),
        }))
    }

    async fn sleepy(_ctx: CallContext, _req: Value) -> CallResult {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Value::Null)
    }

    fn test_state() -> AppState {
        AppState {
            service: CallService::new(greeter()),
            ..bare_state()
        }
    }

    fn greeter() -> MethodRouter {
        let mut router = MethodRouter::new();
        router.register(MethodName::parse("/helloworld.Greeter/SayHello").unwrap(), say_hello);
        router.register(MethodName::parse("/helloworld.Greeter/Sleepy").unwrap(), sleepy);
        router
    }

    fn bare_state() -> AppState {
        let lifecycle = Arc::new(LifecycleController::new());
        lifecycle.set_listening();
        AppState {
            service: CallService::new(MethodRouter::new()),
            lifecycle,
            metrics: None,
            call_ids: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/{service}/{method}", post(rpc_handler))
            .with_state(state)
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn successful_call_returns_json() {
        let request = Request::post("/helloworld.Greeter/SayHello")
            .header("user-agent", "unit-test")
            .body(Body::from(r#"{"name":"world"}"#))
            .unwrap();

        let (status, headers, body) = send(test_state(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[RPC_STATUS_HEADER], "OK");
        assert_eq!(body["message"], "Hello world");
        assert_eq!(body["call_id"], 1);
        assert_eq!(body["user_agent"], "unit-test");
        assert_eq!(body["has_deadline"], false);
    }

    #[tokio::test]
    async fn empty_body_is_null_request() {
        let request = Request::post("/helloworld.Greeter/SayHello")
            .body(Body::empty())
            .unwrap();

        let (status, _, body) = send(test_state(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Hello stranger");
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let request = Request::post("/helloworld.Greeter/Nope")
            .body(Body::empty())
            .unwrap();

        let (status, headers, body) = send(test_state(), request).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(headers[RPC_STATUS_HEADER], "UNIMPLEMENTED");
        assert_eq!(body["code"], "UNIMPLEMENTED");
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_argument() {
        let request = Request::post("/helloworld.Greeter/SayHello")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, _, body) = send(test_state(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        let request = Request::post("/helloworld.Greeter/Sleepy")
            .header(TIMEOUT_HEADER, "20")
            .body(Body::empty())
            .unwrap();

        let (status, headers, _) = send(test_state(), request).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(headers[RPC_STATUS_HEADER], "DEADLINE_EXCEEDED");
    }

    #[tokio::test]
    async fn deadline_expiry_is_recorded_by_interceptors() {
        let metrics = ServerMetrics::with_default_buckets().unwrap();
        let state = AppState {
            service: CallService::new(MetricsLayer::new(metrics.clone()).layer(greeter())),
            metrics: Some(metrics.clone()),
            ..bare_state()
        };
        let request = Request::post("/helloworld.Greeter/Sleepy")
            .header(TIMEOUT_HEADER, "20")
            .body(Body::empty())
            .unwrap();

        let (status, _, _) = send(state, request).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        let text = metrics.render().unwrap();
        assert!(text.contains("rpc_code=\"DEADLINE_EXCEEDED\""));
    }

    #[tokio::test]
    async fn deadline_is_visible_to_handler() {
        let request = Request::post("/helloworld.Greeter/SayHello")
            .header(TIMEOUT_HEADER, "5000")
            .body(Body::empty())
            .unwrap();

        let (_, _, body) = send(test_state(), request).await;
        assert_eq!(body["has_deadline"], true);
    }

    #[tokio::test]
    async fn malformed_timeout_is_rejected() {
        let request = Request::post("/helloworld.Greeter/SayHello")
            .header(TIMEOUT_HEADER, "soon")
            .body(Body::empty())
            .unwrap();

        let (status, _, _) = send(test_state(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn draining_server_rejects_calls() {
        let state = test_state();
        state.lifecycle.begin_drain();
        let lifecycle = Arc::clone(&state.lifecycle);

        let request = Request::post("/helloworld.Greeter/SayHello")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(state, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers[RPC_STATUS_HEADER], "UNAVAILABLE");
        assert_eq!(lifecycle.in_flight_count(), 0);
    }

    #[test]
    fn panic_errors_map_to_internal() {
        let response = error_response(&CallError::Panic {
            payload: "boom".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[RPC_STATUS_HEADER], "INTERNAL");
    }
}
