//! Panic recovery: converts a panic anywhere inside the wrapped service into a
//! `CallError::Panic` instead of tearing down the task serving the call.
//!
//! Only code wrapped by this layer is covered. Interceptors installed outside
//! it are not.

use std::any::Any;
use std::future::{self, Future};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use callchain_core::{dump_panic, CallContext, CallError, Logger};
use futures_util::FutureExt;
use serde_json::Value;
use tower::{Layer, Service};

use crate::service::call::UnaryCall;

#[derive(Clone)]
pub struct RecoveryLayer {
    logger: Arc<dyn Logger>,
}

impl RecoveryLayer {
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService {
            inner,
            logger: Arc::clone(&self.logger),
        }
    }
}

#[derive(Clone)]
pub struct RecoveryService<S> {
    inner: S,
    logger: Arc<dyn Logger>,
}

impl<S> Service<UnaryCall> for RecoveryService<S>
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

        // Panics can surface while building the inner future as well as while polling it.
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(call))) {
            Ok(fut) => fut,
            Err(payload) => {
                let err = recover(logger.as_ref(), &ctx, payload.as_ref());
                return Box::pin(future::ready(Err(err)));
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(recover(logger.as_ref(), &ctx, payload.as_ref())),
            }
        })
    }
}

fn recover(logger: &dyn Logger, ctx: &CallContext, payload: &(dyn Any + Send)) -> CallError {
    let dumped = dump_panic(payload);
    logger.error(ctx, format_args!("{dumped}"));
    CallError::Panic { payload: dumped }
}

#[cfg(test)]
mod tests {
    use callchain_core::{Code, MemoryLogger, MethodName};
    use tower::{service_fn, ServiceExt};
    use tracing::Level;

    use super::*;

    fn make_call() -> UnaryCall {
        let ctx = CallContext::new(11, MethodName::parse("/pkg.Svc/Explode").unwrap());
        UnaryCall::new(ctx, Value::Null)
    }

    /// Service whose `call` panics before producing a future.
    #[derive(Clone)]
    struct PanicsOnCall;

    impl Service<UnaryCall> for PanicsOnCall {
        type Response = Value;
        type Error = CallError;
        type Future = future::Ready<Result<Value, CallError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: UnaryCall) -> Self::Future {
            panic!("eager boom");
        }
    }

    #[tokio::test]
    async fn converts_panic_while_polling() {
        let logger = Arc::new(MemoryLogger::new());
        let svc = RecoveryLayer::new(logger.clone()).layer(service_fn(|_call: UnaryCall| async {
            if true {
                panic!("boom");
            }
            Ok::<Value, CallError>(Value::Null)
        }));

        let err = svc.oneshot(make_call()).await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains("boom"));

        let errors = logger.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("boom"));
        assert_eq!(errors[0].call_id, Some(11));
    }

    #[tokio::test]
    async fn converts_panic_while_building_future() {
        let logger = Arc::new(MemoryLogger::new());
        let svc = RecoveryLayer::new(logger.clone()).layer(PanicsOnCall);

        let err = svc.oneshot(make_call()).await.unwrap_err();
        assert!(err.to_string().contains("eager boom"));
        assert_eq!(logger.at_level(Level::ERROR).len(), 1);
    }

    #[tokio::test]
    async fn string_array_payload_is_dumped() {
        let logger = Arc::new(MemoryLogger::new());
        let svc = RecoveryLayer::new(logger.clone()).layer(service_fn(|_call: UnaryCall| async {
            if true {
                std::panic::panic_any(["is a test".to_string()]);
            }
            Ok::<Value, CallError>(Value::Null)
        }));

        let err = svc.oneshot(make_call()).await.unwrap_err();
        assert!(matches!(err, CallError::Panic { ref payload } if payload.contains("is a test")));
        assert_eq!(logger.at_level(Level::ERROR).len(), 1);
    }

    #[tokio::test]
    async fn opaque_payload_still_yields_error() {
        struct Opaque;

        let logger = Arc::new(MemoryLogger::new());
        let svc = RecoveryLayer::new(logger.clone()).layer(service_fn(|_call: UnaryCall| async {
            if true {
                std::panic::panic_any(Opaque);
            }
            Ok::<Value, CallError>(Value::Null)
        }));

        let err = svc.oneshot(make_call()).await.unwrap_err();
        assert!(matches!(err, CallError::Panic { ref payload } if payload == callchain_core::UNSERIALIZABLE));
        assert_eq!(logger.at_level(Level::ERROR).len(), 1);
    }

    #[tokio::test]
    async fn results_pass_through_untouched() {
        let logger = Arc::new(MemoryLogger::new());
        let svc = RecoveryLayer::new(logger.clone()).layer(service_fn(|_call: UnaryCall| async {
            Err::<Value, _>(CallError::not_found("missing"))
        }));

        let err = svc.oneshot(make_call()).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert!(logger.entries().is_empty());
    }
}
