//! Callchain server: unary RPC calls over HTTP/JSON, wrapped in an ordered
//! interceptor pipeline, with a non-blocking start and graceful shutdown.

pub mod network;
pub mod options;
pub mod service;

pub use network::{LifecycleState, RpcServer, ServerOption, TransportParams};
pub use options::ServerOptions;
pub use service::{
    CallService, Interceptor, InterceptorKind, MethodRouter, Next, NoopTracer, Pipeline,
    PipelineSettings, ServerMetrics, SpanTracer, Tracer, UnaryCall, UnaryHandler,
};
