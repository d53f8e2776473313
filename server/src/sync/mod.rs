//! Sync orchestration: coordinator, offline queue and service lifecycle.

mod coordinator;
mod offline_queue;
mod service;

pub use coordinator::{
    DeviceSyncInit, SweepReport, SyncCartRequest, SyncCartResponse, SyncConfig, SyncCoordinator,
};
pub use offline_queue::{OfflineQueue, OfflineQueueEntry, DEFAULT_QUEUE_CAPACITY};
pub use service::SyncService;

use cartsync_engine::Timestamp;

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
