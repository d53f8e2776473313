//! Sync endpoint routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::error::Result;
use crate::handlers::{
    ConnectedDevicesResponse, InitDeviceRequest, ResolveConflictsBody, SyncCartBody,
};
use crate::sync::{DeviceSyncInit, SyncCartResponse};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/devices/{device_id}/init", post(init_device_handler))
        .route("/users/{user_id}/devices", get(connected_devices_handler))
        .route("/carts/{cart_id}/sync", post(sync_cart_handler))
        .route("/sync/{sync_id}/resolve", post(resolve_handler))
}

/// POST /devices/{device_id}/init - Register a device and fetch its config.
async fn init_device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<InitDeviceRequest>,
) -> Result<Json<DeviceSyncInit>> {
    let init = state
        .coordinator()
        .initialize_device_sync(&request.user_id, &device_id, request.attributes)
        .await?;
    Ok(Json(init))
}

/// POST /carts/{cart_id}/sync - Submit a device's cart.
async fn sync_cart_handler(
    State(state): State<AppState>,
    Path(cart_id): Path<String>,
    Json(body): Json<SyncCartBody>,
) -> Result<Json<SyncCartResponse>> {
    let response = state
        .coordinator()
        .sync_cart(body.into_request(cart_id))
        .await?;
    Ok(Json(response))
}

/// POST /sync/{sync_id}/resolve - Settle a sync parked on conflicts.
async fn resolve_handler(
    State(state): State<AppState>,
    Path(sync_id): Path<String>,
    Json(body): Json<ResolveConflictsBody>,
) -> Result<Json<SyncCartResponse>> {
    let response = state
        .coordinator()
        .resolve_conflicts(&sync_id, body.strategy, body.user_choice)
        .await?;
    Ok(Json(response))
}

/// GET /users/{user_id}/devices - Devices of a user with a live connection.
async fn connected_devices_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<ConnectedDevicesResponse> {
    let devices = state.coordinator().connected_devices(&user_id);
    Json(ConnectedDevicesResponse { user_id, devices })
}
