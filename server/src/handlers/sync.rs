//! Sync request bodies and their translation into coordinator calls.

use cartsync_engine::{
    CartItem, CartSnapshot, DeviceId, NetworkInfo, ResolutionStrategy, SyncType, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::DeviceAttributes;
use crate::sync::{SyncCartRequest, SyncCartResponse};
use crate::websocket::SyncMessage;

/// Request body for device initialization.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitDeviceRequest {
    pub user_id: UserId,
    #[serde(flatten)]
    pub attributes: DeviceAttributes,
}

/// Request body for a cart sync.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCartBody {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub cart_data: CartSnapshot,
    #[serde(default)]
    pub previous_data: Option<CartSnapshot>,
    #[serde(default)]
    pub strategy: Option<ResolutionStrategy>,
    #[serde(default)]
    pub auto_resolve: bool,
    #[serde(default)]
    pub user_choice: Option<Vec<CartItem>>,
    #[serde(default)]
    pub sync_type: SyncType,
    #[serde(default)]
    pub network_info: Option<NetworkInfo>,
}

impl SyncCartBody {
    pub fn into_request(self, cart_id: String) -> SyncCartRequest {
        SyncCartRequest {
            user_id: self.user_id,
            cart_id,
            device_id: self.device_id,
            snapshot: self.cart_data,
            previous_snapshot: self.previous_data,
            strategy: self.strategy,
            auto_resolve: self.auto_resolve,
            user_choice: self.user_choice,
            sync_type: self.sync_type,
            network_info: self.network_info,
        }
    }
}

/// Request body for settling a parked sync.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictsBody {
    pub strategy: ResolutionStrategy,
    #[serde(default)]
    pub user_choice: Option<Vec<CartItem>>,
}

/// Response for the connected-devices lookup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDevicesResponse {
    pub user_id: UserId,
    pub devices: Vec<DeviceId>,
}

/// Frame sent back to the device that asked for a sync.
pub fn sync_reply(result: Result<SyncCartResponse, SyncError>, timestamp: u64) -> SyncMessage {
    match result {
        Ok(response) if response.conflicts.is_empty() => {
            SyncMessage::cart_sync(response.resolved_snapshot, response.sync_id, timestamp)
        }
        Ok(response) => SyncMessage::conflict_resolved(
            response.resolved_snapshot,
            response.conflicts,
            response.sync_id,
            timestamp,
        ),
        Err(SyncError::ConflictUnresolved { sync_id, conflicts }) => SyncMessage::error(
            "Unresolved conflicts, choose a resolution strategy",
            Some(sync_id),
            Some(conflicts),
            timestamp,
        ),
        Err(e) => SyncMessage::error(e.to_string(), None, None, timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::MessageType;
    use cartsync_engine::{Conflict, NetworkType};

    #[test]
    fn init_body_flattens_attributes() {
        let json = r#"{"userId": "user-1", "deviceType": "desktop", "networkType": "wifi"}"#;
        let body: InitDeviceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(body.user_id, "user-1");
        assert_eq!(body.attributes.network_type, NetworkType::Wifi);
    }

    #[test]
    fn sync_body_defaults() {
        let json = r#"{
            "userId": "user-1",
            "deviceId": "phone",
            "cartData": {"items": []}
        }"#;
        let body: SyncCartBody = serde_json::from_str(json).unwrap();
        let request = body.into_request("cart-1".to_string());
        assert_eq!(request.cart_id, "cart-1");
        assert!(!request.auto_resolve);
        assert!(request.strategy.is_none());
        assert_eq!(request.sync_type, SyncType::Full);
    }

    #[test]
    fn unresolved_reply_carries_sync_id() {
        let conflicts = vec![Conflict::ItemRemoved {
            product_id: "A".into(),
            current_quantity: 1,
        }];
        let reply = sync_reply(
            Err(SyncError::ConflictUnresolved {
                sync_id: "s-1".into(),
                conflicts: conflicts.clone(),
            }),
            5,
        );
        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.sync_id.as_deref(), Some("s-1"));
        assert_eq!(reply.conflicts, Some(conflicts));
    }
}
