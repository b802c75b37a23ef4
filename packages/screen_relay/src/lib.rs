//! Screen Relay
//!
//! Rendezvous server for live screen sharing: hosts stream frames to the
//! relay, which fans them out to every viewer watching that host, and
//! viewers send control commands back through the relay to the host.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod relay;
pub mod ws;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::{DuplicateHostPolicy, RelayConfig};
pub use error::RelayError;
pub use relay::Relay;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: Arc::new(Relay::new(config)),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/hosts", get(handlers::hosts_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
