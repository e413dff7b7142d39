//! Distributed-tracing interceptor and the tracer interface it delegates to.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use callchain_core::{CallContext, CallError, Code};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::field::{self, Empty};
use tracing::{Instrument, Span};

use crate::service::call::UnaryCall;

/// Metadata key carrying a W3C trace context from the caller.
pub const TRACEPARENT: &str = "traceparent";

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

/// Creates and finishes the span that covers one call.
pub trait Tracer: Send + Sync {
    /// Opens a span for the call, linked to any trace context in its metadata.
    fn start_span(&self, ctx: &CallContext) -> Span;

    /// Closes out the span once the rest of the chain has returned.
    fn finish_span(&self, span: &Span, outcome: Result<(), &CallError>) {
        let code = outcome.map_or_else(CallError::code, |()| Code::Ok);
        span.record("rpc.status_code", code.as_str());
        if let Err(err) = outcome {
            span.record("error", field::display(err));
        }
    }
}

/// Tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _ctx: &CallContext) -> Span {
        Span::none()
    }
}

/// Tracer backed by `tracing` spans; exporting is up to the installed subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanTracer;

impl Tracer for SpanTracer {
    fn start_span(&self, ctx: &CallContext) -> Span {
        let parent = ctx.metadata.get(TRACEPARENT).and_then(parse_traceparent);
        let (trace_id, parent_id) = match parent {
            Some((trace_id, parent_id)) => (trace_id.to_string(), Some(parent_id.to_string())),
            None => (uuid::Uuid::new_v4().simple().to_string(), None),
        };

        tracing::info_span!(
            "rpc.server",
            rpc.system = "callchain",
            rpc.service = ctx.method.service(),
            rpc.method = ctx.method.method(),
            call_id = ctx.call_id,
            trace_id = %trace_id,
            parent_id = parent_id.as_deref(),
            rpc.status_code = Empty,
            error = Empty,
        )
    }
}

/// Splits a `traceparent` value into its trace id and parent span id.
///
/// Format: `version-traceid-parentid-flags`, with 32 and 16 hex digit ids.
fn parse_traceparent(value: &str) -> Option<(&str, &str)> {
    let mut parts = value.trim().split('-');
    let (_version, trace_id, parent_id, _flags) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    let is_hex = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit());
    if parts.next().is_some() || !is_hex(trace_id, 32) || !is_hex(parent_id, 16) {
        return None;
    }
    Some((trace_id, parent_id))
}

// ---------------------------------------------------------------------------
// TracingLayer
// ---------------------------------------------------------------------------

/// Tower layer that runs the rest of the chain inside a tracer-provided span.
#[derive(Clone)]
pub struct TracingLayer {
    tracer: Arc<dyn Tracer>,
}

impl TracingLayer {
    #[must_use]
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService {
            inner,
            tracer: Arc::clone(&self.tracer),
        }
    }
}

// ---------------------------------------------------------------------------
// TracingService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
    tracer: Arc<dyn Tracer>,
}

impl<S> Service<UnaryCall> for TracingService<S>
where
    S: Service<UnaryCall, Response = Value, Error = CallError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, CallError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: UnaryCall) -> Self::Future {
        let span = self.tracer.start_span(&call.ctx);
        let tracer = Arc::clone(&self.tracer);

        let fut = {
            let _entered = span.enter();
            self.inner.call(call)
        };

        Box::pin(async move {
            let result = fut.instrument(span.clone()).await;
            tracer.finish_span(&span, result.as_ref().map(|_| ()));
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
