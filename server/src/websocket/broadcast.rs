//! Fan-out of committed carts to a user's other devices.
//!
//! Sends run concurrently and each failure stays with its device: it is
//! logged and skipped, never retried inside the same operation and never
//! surfaced to the caller. A device that missed a push catches up on its
//! next full sync.

use std::collections::HashMap;
use std::sync::Arc;

use cartsync_engine::{DeviceId, SyncId, Timestamp};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;

use super::{ConnectionRegistry, OutboundFrame, SyncMessage};
use crate::error::SyncError;

/// Per-device outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub delivered: Vec<DeviceId>,
    pub failed: Vec<DeviceId>,
}

impl BroadcastReport {
    /// True when there was nobody to send to.
    pub fn had_no_targets(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

/// Delivery state of one pushed frame on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Handed to the transport
    Sent { at: Timestamp },
    /// The device confirmed it applied the frame
    Acknowledged { at: Timestamp },
}

#[derive(Debug)]
struct DeliveryEntry {
    created_at: Timestamp,
    devices: HashMap<DeviceId, DeliveryState>,
}

/// Tracks which devices confirmed which pushes.
///
/// State only moves on a real `ack` from the device.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    entries: DashMap<SyncId, DeliveryEntry>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, sync_id: &str, devices: &[DeviceId], now: Timestamp) {
        if devices.is_empty() {
            return;
        }
        let mut entry = self
            .entries
            .entry(sync_id.to_string())
            .or_insert_with(|| DeliveryEntry {
                created_at: now,
                devices: HashMap::new(),
            });
        for device in devices {
            entry
                .devices
                .insert(device.clone(), DeliveryState::Sent { at: now });
        }
    }

    /// Mark a push acknowledged. Returns false for unknown pushes.
    pub fn acknowledge(&self, sync_id: &str, device_id: &str, now: Timestamp) -> bool {
        match self.entries.get_mut(sync_id) {
            Some(mut entry) => match entry.devices.get_mut(device_id) {
                Some(state) => {
                    if let DeliveryState::Sent { .. } = state {
                        *state = DeliveryState::Acknowledged { at: now };
                    }
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn status(&self, sync_id: &str) -> Option<HashMap<DeviceId, DeliveryState>> {
        self.entries.get(sync_id).map(|e| e.devices.clone())
    }

    /// Forget pushes older than `cutoff`. Returns how many were dropped.
    pub fn prune(&self, cutoff: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created_at >= cutoff);
        before - self.entries.len()
    }
}

/// Sends committed carts to every connected device of a user but one.
#[derive(Debug)]
pub struct SyncBroadcaster {
    registry: Arc<ConnectionRegistry>,
    deliveries: DeliveryTracker,
}

impl SyncBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            deliveries: DeliveryTracker::new(),
        }
    }

    pub fn deliveries(&self) -> &DeliveryTracker {
        &self.deliveries
    }

    /// Broadcast a message to all of a user's devices except the origin.
    pub async fn broadcast(
        &self,
        user_id: &str,
        origin_device_id: &str,
        message: &SyncMessage,
    ) -> BroadcastReport {
        let targets = self.registry.targets(user_id, origin_device_id);
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let sends = targets.into_iter().map(|conn| async move {
            let frame = OutboundFrame::encode(message, &conn.profile);
            let result = conn.transport.send(frame).await;
            (conn.device_id, result)
        });

        let mut report = BroadcastReport::default();
        for (device_id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(device_id),
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        device_id = %device_id,
                        "Broadcast send failed, skipping device: {}",
                        e
                    );
                    report.failed.push(device_id);
                }
            }
        }

        if let Some(sync_id) = &message.sync_id {
            self.deliveries
                .track(sync_id, &report.delivered, message.timestamp);
        }

        tracing::debug!(
            user_id = %user_id,
            origin = %origin_device_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast cart to devices"
        );

        report
    }

    /// Send a message to one connected device.
    pub async fn send_to(
        &self,
        user_id: &str,
        device_id: &str,
        message: &SyncMessage,
    ) -> Result<(), SyncError> {
        let conn = self
            .registry
            .get(user_id, device_id)
            .ok_or_else(|| SyncError::NotFound(format!("connection for device {}", device_id)))?;

        let frame = OutboundFrame::encode(message, &conn.profile);
        conn.transport
            .send(frame)
            .await
            .map_err(|e| SyncError::Transport {
                device_id: device_id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{DeviceTransport, MessageSender, TransportError};
    use async_trait::async_trait;
    use cartsync_engine::{CartItem, CartSnapshot, NetworkProfile};
    use tokio::sync::mpsc;

    struct BrokenTransport;

    #[async_trait]
    impl DeviceTransport for BrokenTransport {
        async fn send(&self, _frame: OutboundFrame) -> Result<(), TransportError> {
            Err(TransportError::Send("socket reset".into()))
        }
    }

    fn connect(
        registry: &ConnectionRegistry,
        user: &str,
        device: &str,
    ) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx): (MessageSender, _) = mpsc::unbounded_channel();
        registry.register(user, device, Arc::new(tx), NetworkProfile::balanced(), 0);
        rx
    }

    fn message() -> SyncMessage {
        SyncMessage::cart_sync(
            CartSnapshot::from_items(vec![CartItem::new("A", 1, 1)], 1),
            "sync-1",
            10,
        )
    }

    #[tokio::test]
    async fn test_broadcast_except_origin() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut phone = connect(&registry, "user-1", "phone");
        let mut desktop = connect(&registry, "user-1", "desktop");
        let mut other_user = connect(&registry, "user-2", "desktop");

        let broadcaster = SyncBroadcaster::new(registry);
        let report = broadcaster.broadcast("user-1", "phone", &message()).await;

        assert_eq!(report.delivered, vec!["desktop".to_string()]);
        assert!(report.failed.is_empty());

        assert!(phone.try_recv().is_err());
        assert!(other_user.try_recv().is_err());
        let frame = desktop.try_recv().unwrap();
        assert_eq!(frame.message().unwrap(), message());
    }

    #[tokio::test]
    async fn failed_target_does_not_abort_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.register(
            "user-1",
            "tablet",
            Arc::new(BrokenTransport),
            NetworkProfile::balanced(),
            0,
        );
        let mut desktop = connect(&registry, "user-1", "desktop");

        let broadcaster = SyncBroadcaster::new(registry);
        let report = broadcaster.broadcast("user-1", "phone", &message()).await;

        assert_eq!(report.delivered, vec!["desktop".to_string()]);
        assert_eq!(report.failed, vec!["tablet".to_string()]);
        assert!(desktop.try_recv().is_ok());
    }

    #[tokio::test]
    async fn no_targets_is_empty_report() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _phone = connect(&registry, "user-1", "phone");

        let broadcaster = SyncBroadcaster::new(registry);
        let report = broadcaster.broadcast("user-1", "phone", &message()).await;
        assert!(report.had_no_targets());
    }

    #[tokio::test]
    async fn acknowledgements_move_delivery_state() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _desktop = connect(&registry, "user-1", "desktop");

        let broadcaster = SyncBroadcaster::new(registry);
        broadcaster.broadcast("user-1", "phone", &message()).await;

        let status = broadcaster.deliveries().status("sync-1").unwrap();
        assert_eq!(status["desktop"], DeliveryState::Sent { at: 10 });

        assert!(broadcaster.deliveries().acknowledge("sync-1", "desktop", 20));
        assert!(!broadcaster.deliveries().acknowledge("sync-1", "phone", 20));
        assert!(!broadcaster.deliveries().acknowledge("sync-9", "desktop", 20));

        let status = broadcaster.deliveries().status("sync-1").unwrap();
        assert_eq!(status["desktop"], DeliveryState::Acknowledged { at: 20 });

        assert_eq!(broadcaster.deliveries().prune(11), 1);
        assert!(broadcaster.deliveries().status("sync-1").is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_device_is_not_found() {
        let broadcaster = SyncBroadcaster::new(Arc::new(ConnectionRegistry::new()));
        let result = broadcaster.send_to("user-1", "phone", &message()).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }
}
