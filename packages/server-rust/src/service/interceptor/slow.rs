//! Slow-call detection: warns when the rest of the chain takes longer than a
//! threshold. Never alters the response or error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use callchain_core::{CallError, Logger};
use serde_json::Value;
use tower::{Layer, Service};

use crate::service::call::UnaryCall;

// ---------------------------------------------------------------------------
// SlowCallLayer
// ---------------------------------------------------------------------------

/// Tower layer that times each call and logs a warning past `threshold`.
///
/// A zero threshold disables the warning.
#[derive(Clone)]
pub struct SlowCallLayer {
    threshold: Duration,
    logger: Arc<dyn Logger>,
}

impl SlowCallLayer {
    #[must_use]
    pub fn new(threshold: Duration, logger: Arc<dyn Logger>) -> Self {
        Self { threshold, logger }
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl<S> Layer<S> for SlowCallLayer {
    type Service = SlowCallService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SlowCallService {
            inner,
            threshold: self.threshold,
            logger: Arc::clone(&self.logger),
        }
    }
}

// ---------------------------------------------------------------------------
// SlowCallService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SlowCallService<S> {
    inner: S,
    threshold: Duration,
    logger: Arc<dyn Logger>,
}

impl<S> Service<UnaryCall> for SlowCallService<S>
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
        let ctx = call.ctx.clone();
        let threshold = self.threshold;
        let logger = Arc::clone(&self.logger);

        let start = Instant::now();
        let fut = self.inner.call(call);

        Box::pin(async move {
            let result = fut.await;
            let elapsed = start.elapsed();

            if !threshold.is_zero() && elapsed > threshold {
                logger.warn(
                    &ctx,
                    format_args!(
                        "slow server call {}: elapsed {}ms exceeds threshold {}ms",
                        ctx.method,
                        elapsed.as_millis(),
                        threshold.as_millis()
                    ),
                );
            }

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
