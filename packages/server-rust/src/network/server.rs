//! RPC server with a non-blocking start and a blocking graceful shutdown.
//!
//! `new()` assembles the interceptor pipeline and transport settings,
//! `start()` binds and spawns the serve loop, and `graceful_shutdown()`
//! stops accepting calls and waits for in-flight ones to finish.

use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use axum_server::Handle;
use callchain_core::{CallError, Code, Logger, MethodName};
use hyper_util::rt::TokioTimer;
use hyper_util::rt::TokioExecutor;
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Level;

use super::config::TransportParams;
use super::handlers::{health_handler, metrics_handler, rpc_handler, AppState};
use super::middleware::apply_http_layers;
use super::shutdown::{LifecycleController, LifecycleState};
use crate::options::ServerOptions;
use crate::service::interceptor::UPKEEP_INTERVAL;
use crate::service::{
    reflection, CallService, MethodRouter, Pipeline, PipelineSettings, ServerMetrics, UnaryHandler,
};

/// An RPC server: handlers, the interceptor pipeline around them, and the
/// listener serving them.
///
/// Lifecycle:
/// 1. `new()` -- reads configuration once and assembles the pipeline
/// 2. `register()` -- adds business handlers
/// 3. `start()` -- binds, registers reflection, spawns the serve loop, returns
/// 4. `graceful_shutdown()` -- stops accepting, waits for in-flight calls
///
/// Repeated `start()`/`graceful_shutdown()` calls, and shutting down a
/// server that never started, log a warning and do nothing.
pub struct RpcServer {
    target: String,
    logger: Arc<dyn Logger>,
    settings: PipelineSettings,
    pipeline: Pipeline,
    transport: TransportParams,
    metrics: Option<ServerMetrics>,
    router: MethodRouter,
    lifecycle: Arc<LifecycleController>,
    handle: Handle,
    task: Option<JoinHandle<()>>,
    upkeep: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl RpcServer {
    /// Builds a server that will listen on `target` (`host:port`; port 0
    /// picks a free port).
    #[must_use]
    pub fn new(target: impl Into<String>, options: ServerOptions) -> Self {
        let config = options.config_or_default();
        let logger = options.logger_or_default();
        let tracer = options.tracer_or_default();

        let settings = PipelineSettings::from_config(config.as_ref());
        let transport =
            TransportParams::from_config(config.as_ref()).apply(&options.server_options);

        let metrics = if settings.metrics {
            options.metrics.clone().or_else(|| {
                ServerMetrics::with_default_buckets()
                    .map_err(|err| {
                        logger.log(
                            Level::WARN,
                            None,
                            format_args!("metrics registry unavailable: {err}"),
                        );
                    })
                    .ok()
            })
        } else {
            None
        };

        let pipeline = Pipeline::assemble(
            &settings,
            &logger,
            &tracer,
            metrics.as_ref(),
            &options.interceptors,
        );

        Self {
            target: target.into(),
            logger,
            settings,
            pipeline,
            transport,
            metrics,
            router: MethodRouter::new(),
            lifecycle: Arc::new(LifecycleController::new()),
            handle: Handle::new(),
            task: None,
            upkeep: None,
            local_addr: None,
        }
    }

    /// Registers a handler for a fully-qualified `/package.Service/Method`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed method name and
    /// `FailedPrecondition` once the server has started.
    pub fn register(&mut self, method: &str, handler: impl UnaryHandler) -> Result<(), CallError> {
        if self.local_addr.is_some() {
            return Err(CallError::status(
                Code::FailedPrecondition,
                format!("cannot register {method}: server already started"),
            ));
        }
        self.router.register(MethodName::parse(method)?, handler);
        Ok(())
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn transport(&self) -> &TransportParams {
        &self.transport
    }

    #[must_use]
    pub fn metrics(&self) -> Option<&ServerMetrics> {
        self.metrics.as_ref()
    }

    #[must_use]
    pub fn router(&self) -> &MethodRouter {
        &self.router
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.lifecycle.in_flight_count()
    }

    /// Bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds the listener, registers reflection and spawns the serve loop.
    ///
    /// Returns as soon as the socket is bound; the address is connectable
    /// from that point. Bind and serve failures are fatal and go through
    /// `Logger::fatal`.
    pub async fn start(&mut self) -> SocketAddr {
        if let Some(addr) = self.local_addr {
            self.logger.log(
                Level::WARN,
                None,
                format_args!("rpc server already started on {addr}"),
            );
            return addr;
        }

        if let Err(err) = reflection::register(&mut self.router) {
            self.logger
                .fatal(format_args!("failed to register reflection service: {err}"));
        }

        let listener = match TcpListener::bind(&self.target).await {
            Ok(listener) => listener,
            Err(err) => self
                .logger
                .fatal(format_args!("failed to listen on {}: {err}", self.target)),
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => self
                .logger
                .fatal(format_args!("failed to read bound address: {err}")),
        };
        let std_listener = match listener.into_std() {
            Ok(listener) => listener,
            Err(err) => self
                .logger
                .fatal(format_args!("failed to hand over listener on {addr}: {err}")),
        };

        let state = AppState {
            service: self.pipeline.wrap(CallService::new(self.router.clone())),
            lifecycle: Arc::clone(&self.lifecycle),
            metrics: self.metrics.clone(),
            call_ids: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        };
        let app = self.build_router(state);

        let mut server = axum_server::from_tcp(std_listener).handle(self.handle.clone());
        configure_http(server.http_builder(), &self.transport);

        self.lifecycle.set_listening();
        self.local_addr = Some(addr);

        let logger = Arc::clone(&self.logger);
        self.task = Some(tokio::spawn(async move {
            if let Err(err) = server
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                logger.fatal(format_args!("rpc server failed on {addr}: {err}"));
            }
        }));

        if let Some(metrics) = self.metrics.clone().filter(ServerMetrics::is_prometheus) {
            self.upkeep = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    metrics.run_upkeep();
                }
            }));
        }

        self.logger.info(format_args!(
            "rpc server listening on {addr} ({} interceptors)",
            self.pipeline.len()
        ));
        addr
    }

    /// Stops accepting calls and blocks until every in-flight call has
    /// completed. No timeout is applied.
    pub async fn graceful_shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            self.logger.log(
                Level::WARN,
                None,
                format_args!("graceful shutdown requested but the rpc server is not running"),
            );
            return;
        };

        self.lifecycle.begin_drain();
        self.logger.info(format_args!(
            "rpc server draining, {} calls in flight",
            self.lifecycle.in_flight_count()
        ));

        self.handle.graceful_shutdown(None);
        if let Err(err) = task.await {
            self.logger
                .log(Level::ERROR, None, format_args!("rpc serve task ended abnormally: {err}"));
        }
        self.lifecycle.wait_for_drain().await;
        if let Some(upkeep) = self.upkeep.take() {
            upkeep.abort();
        }

        self.logger.info(format_args!("rpc server stopped"));
    }

    /// Routes:
    /// - `POST /{package.Service}/{Method}` -- unary call
    /// - `GET /health` -- lifecycle state and in-flight count
    /// - `GET /metrics` -- Prometheus exposition, when metrics are enabled
    fn build_router(&self, state: AppState) -> Router {
        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/{service}/{method}", post(rpc_handler));

        apply_http_layers(router, &self.transport).with_state(state)
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("target", &self.target)
            .field("state", &self.lifecycle.state())
            .field("pipeline", &self.pipeline)
            .field("transport", &self.transport)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Applies keep-alive and connection settings to the HTTP/1 and HTTP/2
/// connection builders.
fn configure_http(builder: &mut Builder<TokioExecutor>, params: &TransportParams) {
    let mut http2 = builder.http2();
    http2
        .timer(TokioTimer::new())
        .keep_alive_interval(params.keepalive_time)
        .keep_alive_timeout(params.keepalive_timeout);
    if let Some(streams) = params.max_concurrent_streams {
        http2.max_concurrent_streams(streams);
    }

    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(params.connection_timeout);
}
