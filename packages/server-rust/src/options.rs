//! Construction options for [`RpcServer`](crate::RpcServer).
//!
//! Every option is optional. Defaults are applied once, when the server is
//! built: `NullConfig`, `TracingLogger`, `NoopTracer`, no custom
//! interceptors, no raw server options.

use std::sync::Arc;

use callchain_core::{ConfigProvider, Logger, NullConfig, TracingLogger};

use crate::network::ServerOption;
use crate::service::{Interceptor, NoopTracer, ServerMetrics, Tracer};

/// Builder for the collaborators and settings a server is assembled from.
#[derive(Default, Clone)]
pub struct ServerOptions {
    pub(crate) config: Option<Arc<dyn ConfigProvider>>,
    pub(crate) logger: Option<Arc<dyn Logger>>,
    pub(crate) tracer: Option<Arc<dyn Tracer>>,
    pub(crate) metrics: Option<ServerMetrics>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) server_options: Vec<ServerOption>,
}

impl ServerOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Registry for the metrics interceptor. Without one, a private
    /// Prometheus-backed registry is created when metrics are enabled.
    #[must_use]
    pub fn metrics(mut self, metrics: ServerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Appends custom interceptors; they run in the order given, inside the
    /// built-in ones.
    #[must_use]
    pub fn interceptors(mut self, interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Appends raw server-level options; later options win.
    #[must_use]
    pub fn server_options(mut self, options: impl IntoIterator<Item = ServerOption>) -> Self {
        self.server_options.extend(options);
        self
    }

    pub(crate) fn config_or_default(&self) -> Arc<dyn ConfigProvider> {
        self.config.clone().unwrap_or_else(|| Arc::new(NullConfig))
    }

    pub(crate) fn logger_or_default(&self) -> Arc<dyn Logger> {
        self.logger.clone().unwrap_or_else(|| Arc::new(TracingLogger))
    }

    pub(crate) fn tracer_or_default(&self) -> Arc<dyn Tracer> {
        self.tracer.clone().unwrap_or_else(|| Arc::new(NoopTracer))
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("config", &self.config.is_some())
            .field("logger", &self.logger.is_some())
            .field("tracer", &self.tracer.is_some())
            .field("metrics", &self.metrics)
            .field("interceptors", &self.interceptors.len())
            .field("server_options", &self.server_options)
            .finish()
    }
}
