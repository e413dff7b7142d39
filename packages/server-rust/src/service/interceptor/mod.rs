//! Built-in unary interceptors, each a tower `Layer`/`Service` pair, plus the
//! adapter for user-supplied ones.

pub mod custom;
pub mod debug;
pub mod metrics;
pub mod recovery;
pub mod slow;
pub mod trace;

pub use custom::{Interceptor, InterceptorService, Next};
pub use debug::{DebugLayer, DebugService};
pub use metrics::{MetricsLayer, MetricsService, ServerMetrics, DEFAULT_BUCKETS, UPKEEP_INTERVAL};
pub use recovery::{RecoveryLayer, RecoveryService};
pub use slow::{SlowCallLayer, SlowCallService};
pub use trace::{NoopTracer, SpanTracer, Tracer, TracingLayer, TracingService, TRACEPARENT};
