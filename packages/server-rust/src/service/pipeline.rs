//! Pipeline assembly: orders the interceptor units and composes them around
//! the method router into a single call service.

use std::sync::Arc;
use std::time::Duration;

use callchain_core::{keys, ConfigProvider, Logger};
use tower::Layer;

use super::call::CallService;
use super::interceptor::{
    DebugLayer, Interceptor, InterceptorService, MetricsLayer, RecoveryLayer, ServerMetrics,
    SlowCallLayer, Tracer, TracingLayer,
};

// ---------------------------------------------------------------------------
// PipelineSettings
// ---------------------------------------------------------------------------

/// Feature flags read from configuration when the pipeline is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSettings {
    pub tracing: bool,
    pub metrics: bool,
    pub slow_detection: bool,
    /// Zero disables the slow-call check even when `slow_detection` is set.
    pub slow_threshold: Duration,
    pub debug: bool,
}

impl PipelineSettings {
    /// Reads the flags from `config`. Negative thresholds are treated as zero.
    #[must_use]
    pub fn from_config(config: &dyn ConfigProvider) -> Self {
        let threshold_ms = u64::try_from(config.get_i64(keys::SLOW_THRESHOLD_MS)).unwrap_or(0);
        Self {
            tracing: config.get_bool(keys::ENABLE_TRACING),
            metrics: config.get_bool(keys::ENABLE_METRICS),
            slow_detection: config.get_bool(keys::ENABLE_SLOW_DETECTION),
            slow_threshold: Duration::from_millis(threshold_ms),
            debug: config.get_bool(keys::ENABLE_DEBUG),
        }
    }
}

// ---------------------------------------------------------------------------
// InterceptorUnit
// ---------------------------------------------------------------------------

/// Identifies a unit's role in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorKind {
    Tracing,
    Metrics,
    SlowCall,
    Debug,
    Recovery,
    Custom,
}

/// One configured link of the chain.
#[derive(Clone)]
pub enum InterceptorUnit {
    Tracing(TracingLayer),
    Metrics(MetricsLayer),
    SlowCall(SlowCallLayer),
    Debug(DebugLayer),
    Recovery(RecoveryLayer),
    Custom(Arc<dyn Interceptor>),
}

impl InterceptorUnit {
    #[must_use]
    pub fn kind(&self) -> InterceptorKind {
        match self {
            Self::Tracing(_) => InterceptorKind::Tracing,
            Self::Metrics(_) => InterceptorKind::Metrics,
            Self::SlowCall(_) => InterceptorKind::SlowCall,
            Self::Debug(_) => InterceptorKind::Debug,
            Self::Recovery(_) => InterceptorKind::Recovery,
            Self::Custom(_) => InterceptorKind::Custom,
        }
    }

    /// Wraps `inner` with this unit.
    #[must_use]
    pub fn wrap(&self, inner: CallService) -> CallService {
        match self {
            Self::Tracing(layer) => CallService::new(layer.layer(inner)),
            Self::Metrics(layer) => CallService::new(layer.layer(inner)),
            Self::SlowCall(layer) => CallService::new(layer.layer(inner)),
            Self::Debug(layer) => CallService::new(layer.layer(inner)),
            Self::Recovery(layer) => CallService::new(layer.layer(inner)),
            Self::Custom(interceptor) => {
                CallService::new(InterceptorService::new(Arc::clone(interceptor), inner))
            }
        }
    }
}

impl std::fmt::Debug for InterceptorUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered interceptor units, outermost first.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    units: Vec<InterceptorUnit>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the chain from feature flags and collaborators.
    ///
    /// Order (outermost to innermost):
    /// 1. `TracingLayer` -- if `settings.tracing`
    /// 2. `MetricsLayer` -- if `settings.metrics` and a registry is given
    /// 3. `SlowCallLayer` -- if `settings.slow_detection`
    /// 4. `DebugLayer` -- if `settings.debug`
    /// 5. `RecoveryLayer` -- always
    /// 6. custom interceptors, in registration order
    ///
    /// Recovery sits between the built-ins and the caller-owned code: a panic
    /// in a custom interceptor or a handler becomes `CallError::Panic`, while a
    /// panic in one of the built-in units above it is not caught.
    #[must_use]
    pub fn assemble(
        settings: &PipelineSettings,
        logger: &Arc<dyn Logger>,
        tracer: &Arc<dyn Tracer>,
        metrics: Option<&ServerMetrics>,
        custom: &[Arc<dyn Interceptor>],
    ) -> Self {
        let mut pipeline = Self::new();

        if settings.tracing {
            pipeline.push(InterceptorUnit::Tracing(TracingLayer::new(Arc::clone(tracer))));
        }
        if settings.metrics {
            if let Some(metrics) = metrics {
                pipeline.push(InterceptorUnit::Metrics(MetricsLayer::new(metrics.clone())));
            }
        }
        if settings.slow_detection {
            pipeline.push(InterceptorUnit::SlowCall(SlowCallLayer::new(
                settings.slow_threshold,
                Arc::clone(logger),
            )));
        }
        if settings.debug {
            pipeline.push(InterceptorUnit::Debug(DebugLayer::new(Arc::clone(logger))));
        }

        pipeline.push(InterceptorUnit::Recovery(RecoveryLayer::new(Arc::clone(logger))));

        for interceptor in custom {
            pipeline.push(InterceptorUnit::Custom(Arc::clone(interceptor)));
        }

        pipeline
    }

    /// Appends a unit inside all existing ones.
    pub fn push(&mut self, unit: InterceptorUnit) {
        self.units.push(unit);
    }

    /// Unit kinds, outermost first.
    #[must_use]
    pub fn kinds(&self) -> Vec<InterceptorKind> {
        self.units.iter().map(InterceptorUnit::kind).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Composes the units around `handler`. An empty pipeline returns
    /// `handler` as is.
    #[must_use]
    pub fn wrap(&self, handler: CallService) -> CallService {
        self.units
            .iter()
            .rev()
            .fold(handler, |inner, unit| unit.wrap(inner))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
