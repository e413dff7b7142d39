//! Unary call types: the request envelope, business handlers, and the
//! type-erased service every interceptor wraps.

use std::future::Future;

use async_trait::async_trait;
use callchain_core::{CallContext, CallResult};
use serde_json::Value;
use tower::util::BoxCloneSyncService;

/// One inbound unary call: its context plus the decoded request payload.
#[derive(Debug, Clone)]
pub struct UnaryCall {
    pub ctx: CallContext,
    pub request: Value,
}

impl UnaryCall {
    #[must_use]
    pub fn new(ctx: CallContext, request: Value) -> Self {
        Self { ctx, request }
    }
}

/// Type-erased, cloneable call service. Each interceptor wraps one of these.
pub type CallService = BoxCloneSyncService<UnaryCall, Value, callchain_core::CallError>;

/// Business handler for a single method.
///
/// Any `Fn(CallContext, Value) -> impl Future<Output = CallResult>` closure
/// is a handler.
#[async_trait]
pub trait UnaryHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: CallContext, request: Value) -> CallResult;
}

#[async_trait]
impl<F, Fut> UnaryHandler for F
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    async fn handle(&self, ctx: CallContext, request: Value) -> CallResult {
        self(ctx, request).await
    }
}
