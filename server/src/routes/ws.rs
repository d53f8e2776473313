//! WebSocket upgrade route.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Identity of the connecting device.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: String,
    pub device_id: String,
}

/// Create WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// GET /ws?user_id=&device_id= - Upgrade to a sync WebSocket.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    if query.user_id.trim().is_empty() || query.device_id.trim().is_empty() {
        return Err(SyncError::Validation(
            "user_id and device_id are required".to_string(),
        ));
    }

    let coordinator = state.coordinator().clone();
    Ok(ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, coordinator, query.user_id, query.device_id)
    }))
}
