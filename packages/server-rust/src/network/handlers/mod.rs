//! HTTP handler definitions for the RPC transport.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports the handler functions used to build the router.

pub mod health;
pub mod metrics;
pub mod rpc;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use rpc::rpc_handler;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use super::shutdown::LifecycleController;
use crate::service::{CallService, ServerMetrics};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references and a type-erased service, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The router wrapped in the assembled interceptor pipeline.
    pub service: CallService,
    /// Lifecycle state and in-flight tracking.
    pub lifecycle: Arc<LifecycleController>,
    /// Registry rendered at `/metrics`, when metrics are enabled.
    pub metrics: Option<ServerMetrics>,
    /// Source of per-call ids.
    pub call_ids: Arc<AtomicU64>,
    /// Server start time, used for uptime calculation.
    pub start_time: Instant,
}
