//! Method routing: dispatches a `UnaryCall` to the handler registered for its
//! fully-qualified method name.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use callchain_core::{CallError, MethodName};
use serde_json::Value;
use tower::Service;

use super::call::{UnaryCall, UnaryHandler};

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes calls to business handlers by fully-qualified method name.
///
/// Calls for an unregistered method fail with `CallError::Unimplemented`.
/// A call whose context carries a deadline fails with
/// `CallError::DeadlineExceeded` once it passes, so every interceptor still
/// observes the outcome.
/// Cloning is cheap; clones share the handler table until one of them
/// registers a new method.
#[derive(Clone, Default)]
pub struct MethodRouter {
    handlers: Arc<BTreeMap<MethodName, Arc<dyn UnaryHandler>>>,
}

impl MethodRouter {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for the method.
    pub fn register(&mut self, method: MethodName, handler: impl UnaryHandler) {
        Arc::make_mut(&mut self.handlers).insert(method, Arc::new(handler));
    }

    #[must_use]
    pub fn contains(&self, method: &MethodName) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered methods, sorted.
    pub fn methods(&self) -> impl Iterator<Item = &MethodName> {
        self.handlers.keys()
    }

    /// Registered services with their method names, both sorted.
    #[must_use]
    pub fn services(&self) -> BTreeMap<String, Vec<String>> {
        let mut services: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for method in self.handlers.keys() {
            services
                .entry(method.service().to_string())
                .or_default()
                .push(method.method().to_string());
        }
        services
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service<UnaryCall> for MethodRouter {
    type Response = Value;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, CallError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: UnaryCall) -> Self::Future {
        match self.handlers.get(&call.ctx.method) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let deadline = call.ctx.deadline;
                Box::pin(async move {
                    let fut = handler.handle(call.ctx, call.request);
                    match deadline {
                        Some(deadline) => {
                            tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), fut)
                                .await
                                .unwrap_or(Err(CallError::DeadlineExceeded))
                        }
                        None => fut.await,
                    }
                })
            }
            None => {
                let method = call.ctx.method.full().to_string();
                Box::pin(async move { Err(CallError::Unimplemented { method }) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
