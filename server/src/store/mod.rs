//! Persistence collaborators of the sync core.
//!
//! The coordinator only talks to these traits. [`memory`] backs tests and
//! embedded use; [`crate::db`] backs them with PostgreSQL.

pub mod memory;
mod models;

use std::sync::Arc;

use async_trait::async_trait;
use cartsync_engine::{CartSnapshot, Timestamp};

pub use memory::{MemoryAuditLog, MemoryCartStore, MemoryDeviceStore};
pub use models::*;

/// Errors raised by a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("device {0} belongs to another user")]
    DeviceOwnedElsewhere(String),
}

/// Authoritative cart state, one snapshot per cart.
#[async_trait]
pub trait CartStateStore: Send + Sync {
    async fn get_cart(&self, user_id: &str, cart_id: &str)
        -> Result<Option<CartSnapshot>, StoreError>;

    /// Atomically overwrite the cart. Returns what was stored.
    async fn replace_cart(
        &self,
        user_id: &str,
        cart_id: &str,
        snapshot: &CartSnapshot,
    ) -> Result<CartSnapshot, StoreError>;
}

/// Known devices.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Create or refresh a device from its reported attributes.
    ///
    /// A device id already registered to another user is rejected with
    /// [`StoreError::DeviceOwnedElsewhere`].
    async fn upsert(
        &self,
        user_id: &str,
        device_id: &str,
        attrs: &DeviceAttributes,
    ) -> Result<Device, StoreError>;

    async fn get(&self, device_id: &str) -> Result<Option<Device>, StoreError>;

    async fn mark_inactive(&self, device_id: &str) -> Result<(), StoreError>;

    async fn record_sync(&self, device_id: &str, at: Timestamp) -> Result<(), StoreError>;
}

/// Append-only audit trail of sync operations.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_sync(&self, record: &SyncRecord) -> Result<(), StoreError>;
}

/// The set of collaborators a coordinator runs against.
#[derive(Clone)]
pub struct Stores {
    pub carts: Arc<dyn CartStateStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub audit: Arc<dyn AuditLog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            carts: Arc::new(MemoryCartStore::new()),
            devices: Arc::new(MemoryDeviceStore::new()),
            audit: Arc::new(MemoryAuditLog::new()),
        }
    }
}
