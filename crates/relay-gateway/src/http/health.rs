use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness plus a few cheap gauges.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "instance": state.instance_id,
        "connections": state.connections.connection_count(),
        "pipelineFallbacks": state.pipeline.fallback_count(),
        "blocklistFailures": state.tokens.blocklist_failure_count(),
    }))
}
