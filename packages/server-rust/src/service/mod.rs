//! Call handling: from a decoded unary call to its business handler.
//!
//! 1. **Call model** (`call`): `UnaryCall`, `UnaryHandler`, the type-erased `CallService`
//! 2. **Interceptors** (`interceptor`): tower layers for tracing, metrics, slow calls,
//!    debug logging, panic recovery, plus caller-supplied interceptors
//! 3. **Assembly** (`pipeline`): orders the interceptors and wraps the router
//! 4. **Routing** (`router`): dispatch by fully-qualified method name
//! 5. **Reflection** (`reflection`): service discovery as an ordinary call

pub mod call;
pub mod interceptor;
pub mod pipeline;
pub mod reflection;
pub mod router;

pub use call::{CallService, UnaryCall, UnaryHandler};
pub use interceptor::{Interceptor, Next, NoopTracer, ServerMetrics, SpanTracer, Tracer};
pub use pipeline::{InterceptorKind, InterceptorUnit, Pipeline, PipelineSettings};
pub use router::MethodRouter;
