//! Debug interceptor: logs each call's request on entry and its response and
//! duration on exit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use callchain_core::{dump, dump_value, CallError, Logger};
use serde_json::Value;
use tower::{Layer, Service};

use crate::service::call::UnaryCall;

#[derive(Clone)]
pub struct DebugLayer {
    logger: Arc<dyn Logger>,
}

impl DebugLayer {
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for DebugLayer {
    type Service = DebugService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DebugService {
            inner,
            logger: Arc::clone(&self.logger),
        }
    }
}

#[derive(Clone)]
pub struct DebugService<S> {
    inner: S,
    logger: Arc<dyn Logger>,
}

impl<S> Service<UnaryCall> for DebugService<S>
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
        let logger = Arc::clone(&self.logger);

        let start = Instant::now();
        logger.debug(
            &ctx,
            format_args!(
                "rpc server start {}, req : {}",
                ctx.method,
                dump_value(&call.request)
            ),
        );
        let fut = self.inner.call(call);

        Box::pin(async move {
            let result = fut.await;
            logger.debug(
                &ctx,
                format_args!(
                    "rpc server end [{:?}] {}, resp : {}",
                    start.elapsed(),
                    ctx.method,
                    dump(&result.as_ref().ok())
                ),
            );
            result
        })
    }
}
