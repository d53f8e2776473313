//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cartsync_engine::{Conflict, DeviceId, SyncId};
use serde::Serialize;

use crate::store::StoreError;

/// Sync error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed input, rejected before anything was mutated.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicts exist and no strategy was given. The operation is parked
    /// under `sync_id`.
    #[error("Unresolved conflicts for sync {sync_id}")]
    ConflictUnresolved {
        sync_id: SyncId,
        conflicts: Vec<Conflict>,
    },

    #[error("Send to device {device_id} failed: {reason}")]
    Transport { device_id: DeviceId, reason: String },

    /// The commit failed; nothing was written or broadcast.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<cartsync_engine::Error> for SyncError {
    fn from(e: cartsync_engine::Error) -> Self {
        SyncError::Validation(e.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DeviceOwnedElsewhere(device_id) => {
                SyncError::NotFound(format!("device {}", device_id))
            }
            other => SyncError::Persistence(other.to_string()),
        }
    }
}

impl SyncError {
    pub fn status(&self) -> StatusCode {
        match self {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::ConflictUnresolved { .. } => StatusCode::CONFLICT,
            SyncError::Transport { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_id: Option<SyncId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflicts: Option<Vec<Conflict>>,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            SyncError::ConflictUnresolved { sync_id, conflicts } => ErrorResponse {
                error: "Unresolved conflicts".to_string(),
                details: Some("choose a resolution strategy".to_string()),
                sync_id: Some(sync_id),
                conflicts: Some(conflicts),
            },
            SyncError::Persistence(msg) => {
                tracing::error!("Persistence error: {}", msg);
                ErrorResponse {
                    error: "Persistence error".to_string(),
                    details: Some(msg),
                    sync_id: None,
                    conflicts: None,
                }
            }
            SyncError::Transport { device_id, reason } => {
                tracing::warn!(device_id = %device_id, "Transport error: {}", reason);
                ErrorResponse {
                    error: format!("Send to device {} failed", device_id),
                    details: Some(reason),
                    sync_id: None,
                    conflicts: None,
                }
            }
            SyncError::Validation(msg) | SyncError::NotFound(msg) => ErrorResponse {
                error: msg,
                details: None,
                sync_id: None,
                conflicts: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_are_validation() {
        let err: SyncError = cartsync_engine::Error::MissingUserChoice.into();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_errors_are_persistence() {
        let err: SyncError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn foreign_device_is_not_found() {
        let err: SyncError = StoreError::DeviceOwnedElsewhere("phone".into()).into();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unresolved_conflicts_are_409() {
        let err = SyncError::ConflictUnresolved {
            sync_id: "s-1".into(),
            conflicts: vec![],
        };
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
