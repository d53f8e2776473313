//! Per-user buffer of pushes that found no device to deliver to.

use std::collections::VecDeque;

use cartsync_engine::{DeviceId, Timestamp, UserId};
use dashmap::DashMap;
use serde::Serialize;

use crate::websocket::SyncMessage;

/// Default number of entries kept per user.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// One undelivered push.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub operation: SyncMessage,
    /// Device whose sync produced the push
    pub origin_device_id: DeviceId,
    pub enqueued_at: Timestamp,
}

/// Bounded FIFO queue per user.
///
/// Overflow drops the oldest entry. `drain` hands out and clears the whole
/// queue at once; entries are delivered at most once.
#[derive(Debug)]
pub struct OfflineQueue {
    queues: DashMap<UserId, VecDeque<OfflineQueueEntry>>,
    capacity: usize,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a push for `user_id`. Returns the queue length afterwards.
    pub fn enqueue(
        &self,
        user_id: &str,
        origin_device_id: &str,
        operation: SyncMessage,
        now: Timestamp,
    ) -> usize {
        let mut queue = self.queues.entry(user_id.to_string()).or_default();

        while queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(
                    user_id = %user_id,
                    sync_id = ?dropped.operation.sync_id,
                    "Offline queue full, dropping oldest entry"
                );
            }
        }

        queue.push_back(OfflineQueueEntry {
            operation,
            origin_device_id: origin_device_id.to_string(),
            enqueued_at: now,
        });
        queue.len()
    }

    /// Take every queued entry for `user_id`, oldest first.
    pub fn drain(&self, user_id: &str) -> Vec<OfflineQueueEntry> {
        self.queues
            .remove(user_id)
            .map(|(_, queue)| queue.into())
            .unwrap_or_default()
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, user_id: &str) -> bool {
        self.len(user_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartsync_engine::{CartItem, CartSnapshot};

    fn op(sync_id: &str) -> SyncMessage {
        SyncMessage::cart_sync(
            CartSnapshot::from_items(vec![CartItem::new("A", 1, 1)], 1),
            sync_id,
            1,
        )
    }

    #[test]
    fn test_drain_is_fifo_and_clears() {
        let queue = OfflineQueue::default();
        queue.enqueue("user-1", "phone", op("op1"), 10);
        queue.enqueue("user-1", "phone", op("op2"), 20);

        let drained: Vec<_> = queue
            .drain("user-1")
            .into_iter()
            .map(|e| e.operation.sync_id.unwrap())
            .collect();
        assert_eq!(drained, vec!["op1".to_string(), "op2".to_string()]);
        assert!(queue.drain("user-1").is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = OfflineQueue::new(2);
        queue.enqueue("user-1", "phone", op("op1"), 1);
        queue.enqueue("user-1", "phone", op("op2"), 2);
        assert_eq!(queue.enqueue("user-1", "phone", op("op3"), 3), 2);

        let drained = queue.drain("user-1");
        assert_eq!(drained[0].operation.sync_id.as_deref(), Some("op2"));
        assert_eq!(drained[1].operation.sync_id.as_deref(), Some("op3"));
    }

    #[test]
    fn queues_are_per_user() {
        let queue = OfflineQueue::default();
        queue.enqueue("user-1", "phone", op("op1"), 1);
        queue.enqueue("user-2", "phone", op("op2"), 1);

        assert_eq!(queue.len("user-1"), 1);
        queue.drain("user-1");
        assert!(queue.is_empty("user-1"));
        assert_eq!(queue.len("user-2"), 1);
    }

    #[test]
    fn entries_keep_origin_and_time() {
        let queue = OfflineQueue::default();
        queue.enqueue("user-1", "desktop", op("op1"), 42);

        let entry = &queue.drain("user-1")[0];
        assert_eq!(entry.origin_device_id, "desktop");
        assert_eq!(entry.enqueued_at, 42);
    }
}
