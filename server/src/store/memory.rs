//! In-memory stores for tests and single-process embedding.

use async_trait::async_trait;
use cartsync_engine::{CartId, CartSnapshot, DeviceId, Timestamp, UserId};
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{
    AuditLog, CartStateStore, Device, DeviceAttributes, DeviceStore, StoreError, SyncRecord,
};

/// Carts keyed by (user, cart).
#[derive(Debug, Default)]
pub struct MemoryCartStore {
    carts: DashMap<(UserId, CartId), CartSnapshot>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStateStore for MemoryCartStore {
    async fn get_cart(
        &self,
        user_id: &str,
        cart_id: &str,
    ) -> Result<Option<CartSnapshot>, StoreError> {
        Ok(self
            .carts
            .get(&(user_id.to_string(), cart_id.to_string()))
            .map(|c| c.clone()))
    }

    async fn replace_cart(
        &self,
        user_id: &str,
        cart_id: &str,
        snapshot: &CartSnapshot,
    ) -> Result<CartSnapshot, StoreError> {
        self.carts.insert(
            (user_id.to_string(), cart_id.to_string()),
            snapshot.clone(),
        );
        Ok(snapshot.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    devices: DashMap<DeviceId, Device>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn upsert(
        &self,
        user_id: &str,
        device_id: &str,
        attrs: &DeviceAttributes,
    ) -> Result<Device, StoreError> {
        let mut device = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(user_id, device_id, attrs));
        if !device.belongs_to(user_id) {
            return Err(StoreError::DeviceOwnedElsewhere(device_id.to_string()));
        }
        device.apply(attrs);
        Ok(device.clone())
    }

    async fn get(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.get(device_id).map(|d| d.clone()))
    }

    async fn mark_inactive(&self, device_id: &str) -> Result<(), StoreError> {
        if let Some(mut device) = self.devices.get_mut(device_id) {
            device.active = false;
        }
        Ok(())
    }

    async fn record_sync(&self, device_id: &str, at: Timestamp) -> Result<(), StoreError> {
        if let Some(mut device) = self.devices.get_mut(device_id) {
            device.last_sync_at = Some(at);
        }
        Ok(())
    }
}

/// Audit records kept in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<SyncRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SyncRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record_sync(&self, record: &SyncRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
