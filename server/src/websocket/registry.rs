//! Live connection registry.
//!
//! Tracks one open transport per (user, device). Reconnecting replaces the
//! previous entry instead of adding a second one, and a user's device map is
//! dropped as soon as it becomes empty.

use std::collections::HashMap;
use std::sync::Arc;

use cartsync_engine::{DeviceId, NetworkProfile, Timestamp, UserId};
use dashmap::DashMap;

use super::DeviceTransport;

/// Identifier of one physical connection.
pub type ConnectionId = String;

/// A single live device connection.
#[derive(Clone)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    /// Where frames for this device go
    pub transport: Arc<dyn DeviceTransport>,
    /// Transport tuning for the device's current network
    pub profile: NetworkProfile,
    /// Last time anything arrived from the device
    pub last_seen: Timestamp,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("profile", &self.profile)
            .field("last_seen", &self.last_seen)
            .finish_non_exhaustive()
    }
}

/// Manages live device connections.
///
/// Thread-safe and can be shared across handlers via `Arc`. No method awaits.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Connections grouped by user, then device.
    pub(crate) users: DashMap<UserId, HashMap<DeviceId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Register a device connection, replacing any existing one.
    ///
    /// Returns the new connection ID.
    pub fn register(
        &self,
        user_id: &str,
        device_id: &str,
        transport: Arc<dyn DeviceTransport>,
        profile: NetworkProfile,
        now: Timestamp,
    ) -> ConnectionId {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            transport,
            profile,
            last_seen: now,
        };

        let replaced = self
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(device_id.to_string(), connection);

        match replaced {
            Some(old) => tracing::info!(
                conn_id = %conn_id,
                replaced = %old.id,
                user_id = %user_id,
                device_id = %device_id,
                "Device reconnected, previous connection replaced"
            ),
            None => tracing::info!(
                conn_id = %conn_id,
                user_id = %user_id,
                device_id = %device_id,
                "Device connection registered"
            ),
        }

        conn_id
    }

    /// Remove a device's connection. Idempotent.
    pub fn unregister(&self, user_id: &str, device_id: &str) -> bool {
        self.remove_where(user_id, device_id, |_| true)
    }

    /// Remove a device's connection only if it is still `conn_id`.
    ///
    /// Used by close callbacks so a late close of a replaced socket does not
    /// evict the connection that replaced it.
    pub fn unregister_connection(&self, user_id: &str, device_id: &str, conn_id: &str) -> bool {
        self.remove_where(user_id, device_id, |conn| conn.id == conn_id)
    }

    fn remove_where(
        &self,
        user_id: &str,
        device_id: &str,
        matches: impl Fn(&Connection) -> bool,
    ) -> bool {
        let removed = match self.users.get_mut(user_id) {
            Some(mut devices) => {
                let hit = devices.get(device_id).is_some_and(&matches);
                if hit {
                    devices.remove(device_id);
                }
                hit
            }
            None => false,
        };

        // Clean up empty entries
        self.users.remove_if(user_id, |_, devices| devices.is_empty());

        if removed {
            tracing::info!(user_id = %user_id, device_id = %device_id, "Device connection unregistered");
        }

        removed
    }

    /// Connected device IDs of a user, sorted.
    pub fn list_devices(&self, user_id: &str) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self
            .users
            .get(user_id)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        devices.sort();
        devices
    }

    pub fn is_connected(&self, user_id: &str, device_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|d| d.contains_key(device_id))
    }

    /// Cloned connection entries of a user, minus `except_device`.
    ///
    /// Clones are returned so callers can await sends without holding a
    /// registry lock.
    pub fn targets(&self, user_id: &str, except_device: &str) -> Vec<Connection> {
        self.users
            .get(user_id)
            .map(|devices| {
                devices
                    .values()
                    .filter(|c| c.device_id != except_device)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, user_id: &str, device_id: &str) -> Option<Connection> {
        self.users.get(user_id)?.get(device_id).cloned()
    }

    /// Record activity from a device. Returns false if it is not connected.
    pub fn touch(&self, user_id: &str, device_id: &str, now: Timestamp) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut devices) => match devices.get_mut(device_id) {
                Some(conn) => {
                    conn.last_seen = conn.last_seen.max(now);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Swap the network profile of a connected device.
    pub fn set_profile(&self, user_id: &str, device_id: &str, profile: NetworkProfile) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut devices) => match devices.get_mut(device_id) {
                Some(conn) => {
                    conn.profile = profile;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Connections with no activity since `cutoff`, as (user, device, conn).
    pub fn idle_since(&self, cutoff: Timestamp) -> Vec<(UserId, DeviceId, ConnectionId)> {
        self.users
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|c| c.last_seen < cutoff)
                    .map(|c| (c.user_id.clone(), c.device_id.clone(), c.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Drop every connection.
    pub fn clear(&self) {
        let count = self.connection_count();
        self.users.clear();
        if count > 0 {
            tracing::info!(dropped = count, "Connection registry cleared");
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|e| e.value().len()).sum()
    }

    /// Get the number of users with at least one connection.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{MessageSender, OutboundFrame};
    use tokio::sync::mpsc;

    fn channel() -> (Arc<dyn DeviceTransport>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx): (MessageSender, _) = mpsc::unbounded_channel();
        (Arc::new(tx), rx)
    }

    #[test]
    fn test_register_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();

        registry.register("user-1", "phone", tx, NetworkProfile::balanced(), 0);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.list_devices("user-1"), vec!["phone".to_string()]);

        assert!(registry.unregister("user-1", "phone"));
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.list_devices("user-1").is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register("user-1", "phone", tx, NetworkProfile::balanced(), 0);

        assert!(registry.unregister("user-1", "phone"));
        assert!(!registry.unregister("user-1", "phone"));
        assert!(!registry.unregister("nobody", "nothing"));
    }

    #[test]
    fn last_device_removal_drops_user_entry() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel();
        let (b, _rb) = channel();
        registry.register("user-1", "phone", a, NetworkProfile::balanced(), 0);
        registry.register("user-1", "desktop", b, NetworkProfile::balanced(), 0);

        registry.unregister("user-1", "phone");
        assert!(registry.users.contains_key("user-1"));

        registry.unregister("user-1", "desktop");
        assert!(!registry.users.contains_key("user-1"));
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn reconnect_replaces_instead_of_appending() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel();
        let (b, _rb) = channel();

        let first = registry.register("user-1", "phone", a, NetworkProfile::balanced(), 0);
        let second = registry.register("user-1", "phone", b, NetworkProfile::balanced(), 1);

        assert_ne!(first, second);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.get("user-1", "phone").unwrap().id, second);
    }

    #[test]
    fn stale_close_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel();
        let (b, _rb) = channel();

        let old = registry.register("user-1", "phone", a, NetworkProfile::balanced(), 0);
        let new = registry.register("user-1", "phone", b, NetworkProfile::balanced(), 1);

        assert!(!registry.unregister_connection("user-1", "phone", &old));
        assert!(registry.is_connected("user-1", "phone"));

        assert!(registry.unregister_connection("user-1", "phone", &new));
        assert!(!registry.users.contains_key("user-1"));
    }

    #[test]
    fn targets_exclude_origin() {
        let registry = ConnectionRegistry::new();
        for device in ["phone", "desktop", "tablet"] {
            let (tx, _rx) = channel();
            registry.register("user-1", device, tx, NetworkProfile::balanced(), 0);
        }
        let (tx, _rx) = channel();
        registry.register("user-2", "phone", tx, NetworkProfile::balanced(), 0);

        let mut targets: Vec<_> = registry
            .targets("user-1", "phone")
            .into_iter()
            .map(|c| c.device_id)
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["desktop".to_string(), "tablet".to_string()]);
        assert!(registry.targets("user-3", "phone").is_empty());
    }

    #[test]
    fn idle_connections_are_reported() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel();
        let (b, _rb) = channel();
        registry.register("user-1", "phone", a, NetworkProfile::balanced(), 1_000);
        registry.register("user-1", "desktop", b, NetworkProfile::balanced(), 1_000);

        assert!(registry.touch("user-1", "desktop", 5_000));
        assert!(!registry.touch("user-1", "watch", 5_000));

        let idle = registry.idle_since(3_000);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].1, "phone");
    }
}
