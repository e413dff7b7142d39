//! Health endpoint handler.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Returns lifecycle state, in-flight call count and uptime as JSON.
///
/// Always returns 200; the `state` field tells "up but draining" apart from
/// "listening".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.lifecycle.state().as_str(),
        "in_flight": state.lifecycle.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
