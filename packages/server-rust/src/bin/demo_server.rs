//! Demo server exposing `helloworld.Greeter` behind the full interceptor
//! pipeline. Runs until Ctrl-C, then shuts down gracefully.

use std::sync::Arc;
use std::time::Duration;

use callchain_core::{keys, CallContext, CallError, CallResult, MapConfig};
use callchain_server::{RpcServer, ServerOption, ServerOptions, SpanTracer};
use clap::Parser;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "demo-server", about = "Callchain demo RPC server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "CALLCHAIN_LISTEN", default_value = "127.0.0.1:50051")]
    listen: String,

    /// Keep-alive ping interval in seconds (0 = default).
    #[arg(long, env = "CALLCHAIN_KEEPALIVE_TIME", default_value_t = 0)]
    keepalive_time: i32,

    /// Keep-alive ping timeout in seconds (0 = default).
    #[arg(long, env = "CALLCHAIN_KEEPALIVE_TIMEOUT", default_value_t = 0)]
    keepalive_timeout: i32,

    /// Connection timeout in seconds (0 = default).
    #[arg(long, env = "CALLCHAIN_CONNECTION_TIMEOUT", default_value_t = 0)]
    connection_timeout: i32,

    #[arg(long, env = "CALLCHAIN_TRACING")]
    tracing: bool,

    #[arg(long, env = "CALLCHAIN_METRICS")]
    metrics: bool,

    #[arg(long, env = "CALLCHAIN_SLOW_DETECTION")]
    slow_detection: bool,

    /// Slow-call threshold in milliseconds (0 disables).
    #[arg(long, env = "CALLCHAIN_SLOW_THRESHOLD_MS", default_value_t = 500)]
    slow_threshold_ms: i64,

    #[arg(long, env = "CALLCHAIN_DEBUG")]
    debug: bool,

    /// Maximum request body size in bytes.
    #[arg(long, env = "CALLCHAIN_MAX_REQUEST_BYTES")]
    max_request_bytes: Option<usize>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn to_config(&self) -> MapConfig {
        MapConfig::new()
            .set(keys::KEEPALIVE_TIME, self.keepalive_time)
            .set(keys::KEEPALIVE_TIMEOUT, self.keepalive_timeout)
            .set(keys::CONNECTION_TIMEOUT, self.connection_timeout)
            .set(keys::ENABLE_TRACING, self.tracing)
            .set(keys::ENABLE_METRICS, self.metrics)
            .set(keys::ENABLE_SLOW_DETECTION, self.slow_detection)
            .set(keys::SLOW_THRESHOLD_MS, self.slow_threshold_ms)
            .set(keys::ENABLE_DEBUG, self.debug)
    }
}

async fn say_hello(_ctx: CallContext, req: Value) -> CallResult {
    let name = req["name"]
        .as_str()
        .ok_or_else(|| CallError::invalid_argument("missing field `name`"))?;
    Ok(json!({ "message": format!("Hello {name}") }))
}

async fn say_hello_slowly(ctx: CallContext, req: Value) -> CallResult {
    let delay = req["delay_ms"].as_u64().unwrap_or(1000);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    say_hello(ctx, req).await
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut options = ServerOptions::new()
        .config(Arc::new(args.to_config()))
        .tracer(Arc::new(SpanTracer));
    if let Some(limit) = args.max_request_bytes {
        options = options.server_options([ServerOption::MaxRequestBytes(limit)]);
    }

    let mut server = RpcServer::new(args.listen.clone(), options);
    server.register("/helloworld.Greeter/SayHello", say_hello)?;
    server.register("/helloworld.Greeter/SayHelloSlowly", say_hello_slowly)?;

    let addr = server.start().await;
    tracing::info!(%addr, interceptors = ?server.pipeline().kinds(), "demo server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    server.graceful_shutdown().await;
    Ok(())
}
