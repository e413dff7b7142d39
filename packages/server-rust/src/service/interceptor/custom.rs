//! User-supplied interceptors.
//!
//! An [`Interceptor`] sees the call before the rest of the chain and decides
//! whether, and how, to continue by running [`Next`].

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use callchain_core::{CallError, CallResult};
use serde_json::Value;
use tower::{Service, ServiceExt};

use crate::service::call::{CallService, UnaryCall};

/// Custom unary interceptor.
///
/// Closures of the form `Fn(UnaryCall, Next) -> impl Future<Output = CallResult>`
/// implement this trait.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, call: UnaryCall, next: Next) -> CallResult;
}

#[async_trait]
impl<F, Fut> Interceptor for F
where
    F: Fn(UnaryCall, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    async fn intercept(&self, call: UnaryCall, next: Next) -> CallResult {
        self(call, next).await
    }
}

/// The remainder of the chain, as seen from inside an interceptor.
pub struct Next {
    inner: CallService,
}

impl Next {
    /// Runs the rest of the chain with `call`.
    ///
    /// # Errors
    ///
    /// Returns whatever the inner chain returns.
    pub async fn run(self, call: UnaryCall) -> CallResult {
        self.inner.oneshot(call).await
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Service that hands each call to an interceptor together with the rest of
/// the chain.
#[derive(Clone)]
pub struct InterceptorService {
    interceptor: Arc<dyn Interceptor>,
    inner: CallService,
}

impl InterceptorService {
    #[must_use]
    pub fn new(interceptor: Arc<dyn Interceptor>, inner: CallService) -> Self {
        Self { interceptor, inner }
    }
}

impl Service<UnaryCall> for InterceptorService {
    type Response = Value;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, CallError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: UnaryCall) -> Self::Future {
        // The ready service goes to `Next`; a fresh clone takes its place.
        let clone = self.inner.clone();
        let inner = mem::replace(&mut self.inner, clone);
        let interceptor = Arc::clone(&self.interceptor);

        Box::pin(async move { interceptor.intercept(call, Next { inner }).await })
    }
}
