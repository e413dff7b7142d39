//! Metrics interceptor and the explicit registry it records into.
//!
//! Series follow the usual RPC server layout: a started counter, a handled
//! counter labelled with the outcome code, and a handling-time histogram.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use callchain_core::{CallError, Code, MethodName};
use metrics::{Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use serde_json::Value;
use tower::{Layer, Service};

use crate::service::call::UnaryCall;

pub const STARTED_TOTAL: &str = "rpc_server_started_total";
pub const HANDLED_TOTAL: &str = "rpc_server_handled_total";
pub const HANDLING_SECONDS: &str = "rpc_server_handling_seconds";

/// Histogram buckets used when none are given, in seconds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// How often a running server drains buffered histogram samples.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ServerMetrics
// ---------------------------------------------------------------------------

/// Registry the metrics interceptor records into.
///
/// Wraps an explicit `metrics::Recorder` rather than the process-wide one, so
/// each server owns its series.
#[derive(Clone)]
pub struct ServerMetrics {
    recorder: Arc<dyn Recorder + Send + Sync>,
    prometheus: Option<PrometheusHandle>,
}

impl ServerMetrics {
    /// Records into the given recorder.
    pub fn new(recorder: impl Recorder + Send + Sync + 'static) -> Self {
        Self {
            recorder: Arc::new(recorder),
            prometheus: None,
        }
    }

    /// Records into a private Prometheus recorder with explicit histogram buckets.
    ///
    /// # Errors
    ///
    /// Returns an error if `buckets` is empty.
    pub fn prometheus(buckets: &[f64]) -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(HANDLING_SECONDS.to_string()), buckets)?
            .build_recorder();
        let handle = recorder.handle();
        Ok(Self {
            recorder: Arc::new(recorder),
            prometheus: Some(handle),
        })
    }

    /// Prometheus-backed registry with [`DEFAULT_BUCKETS`].
    ///
    /// # Errors
    ///
    /// See [`ServerMetrics::prometheus`].
    pub fn with_default_buckets() -> Result<Self, BuildError> {
        Self::prometheus(&DEFAULT_BUCKETS)
    }

    /// Prometheus exposition text, when backed by a Prometheus recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.prometheus.as_ref().map(PrometheusHandle::render)
    }

    /// Whether the registry is Prometheus-backed and needs periodic upkeep.
    #[must_use]
    pub fn is_prometheus(&self) -> bool {
        self.prometheus.is_some()
    }

    /// Folds buffered histogram samples into their distributions.
    ///
    /// A recorder built without an exporter only drains histograms when
    /// rendered, so a server that is never scraped must call this
    /// periodically. No-op for non-Prometheus registries.
    pub fn run_upkeep(&self) {
        if let Some(handle) = &self.prometheus {
            handle.run_upkeep();
        }
    }

    fn labels(method: &MethodName) -> Vec<Label> {
        vec![
            Label::new("rpc_type", "unary"),
            Label::new("rpc_service", method.service().to_string()),
            Label::new("rpc_method", method.method().to_string()),
        ]
    }

    pub(crate) fn record_started(&self, method: &MethodName) {
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        let key = Key::from_parts(STARTED_TOTAL, Self::labels(method));
        self.recorder.register_counter(&key, &metadata).increment(1);
    }

    pub(crate) fn record_handled(&self, method: &MethodName, code: Code, elapsed: Duration) {
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

        let mut labels = Self::labels(method);
        labels.push(Label::new("rpc_code", code.as_str()));
        let handled = Key::from_parts(HANDLED_TOTAL, labels);
        self.recorder.register_counter(&handled, &metadata).increment(1);

        let seconds = Key::from_parts(HANDLING_SECONDS, Self::labels(method));
        self.recorder
            .register_histogram(&seconds, &metadata)
            .record(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for ServerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMetrics")
            .field("prometheus", &self.prometheus.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that counts calls and records their latency and outcome.
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    metrics: ServerMetrics,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(metrics: ServerMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: ServerMetrics,
}

impl<S> Service<UnaryCall> for MetricsService<S>
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
        let method = call.ctx.method.clone();
        let metrics = self.metrics.clone();

        metrics.record_started(&method);
        let start = Instant::now();
        let fut = self.inner.call(call);

        Box::pin(async move {
            let result = fut.await;
            let code = match &result {
                Ok(_) => Code::Ok,
                Err(err) => err.code(),
            };
            metrics.record_handled(&method, code, start.elapsed());
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
