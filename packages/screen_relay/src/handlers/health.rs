use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (hosts, clients) = state.relay.counts().await;
    let snapshot = state.relay.stats().snapshot();

    Json(metrics::HealthStatus {
        status: "healthy".to_string(),
        hosts: hosts as u64,
        clients: clients as u64,
        connections: snapshot.connections.active,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.stats().snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Same payload a `get_hosts` message receives
pub async fn hosts_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.hosts_list().await)
}
