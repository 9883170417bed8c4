// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{Router, routing::get};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::ConnectionScheduler;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) scheduler: Arc<ConnectionScheduler>,
    pub(crate) ws_event_connections: Arc<AtomicUsize>,
}

pub fn app(
    scheduler: Arc<ConnectionScheduler>,
    ws_event_connections: Arc<AtomicUsize>,
) -> Router {
    let state = AppState {
        scheduler,
        ws_event_connections,
    };
    Router::new()
        .route("/", get(|| async { "virtwatch: guest stats over WebSockets" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/connections", get(http::connections_handler)) // GET /api/connections
        .route("/api/domains", get(http::domains_handler)) // GET /api/domains
        .route("/api/domains/{uuid}", get(http::domain_detail_handler)) // GET /api/domains/{uuid}
        .route(
            "/api/domains/{uuid}/history",
            get(http::domain_history_handler),
        ) // GET /api/domains/{uuid}/history?metric=cpu
        .route("/ws/events", get(ws::ws_events)) // WS /ws/events
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
