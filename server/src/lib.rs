//! Cartsync Server - real-time cart sync across a shopper's devices.
//!
//! Devices submit their full cart over HTTP or WebSocket. The server detects
//! conflicts against the committed cart, resolves them with the strategy the
//! device picked, commits, and pushes the result to the user's other devices
//! (or queues it while none are online).

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod store;
pub mod sync;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::sync::{SyncCoordinator, SyncService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
}

impl AppState {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        self.service.coordinator()
    }
}

/// Build the router with tracing and CORS layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
