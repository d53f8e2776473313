//! The sync state machine.
//!
//! Every request becomes a [`SyncOperation`] that is detected, resolved,
//! committed, broadcast and recorded while the cart's lock is held, so two
//! devices writing the same cart commit strictly one after the other and a
//! merge always runs against what was last committed.

use std::collections::HashMap;
use std::sync::Arc;

use cartsync_engine::{
    detect_conflicts, profile_for, CartId, CartItem, CartSnapshot, Conflict, DeviceId,
    NetworkInfo, NetworkProfile, ResolutionStrategy, Resolver, SyncId, SyncOperation, SyncPhase,
    SyncType, Timestamp, UserId,
};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use super::{now_millis, OfflineQueue, OfflineQueueEntry};
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::store::{Device, DeviceAttributes, Stores, SyncOutcome, SyncRecord};
use crate::websocket::{
    ConnectionId, ConnectionRegistry, DeliveryState, DeviceTransport, SyncBroadcaster,
    SyncMessage,
};

/// A device's request to sync its cart.
#[derive(Debug, Clone)]
pub struct SyncCartRequest {
    pub user_id: UserId,
    pub cart_id: CartId,
    pub device_id: DeviceId,
    pub snapshot: CartSnapshot,
    /// What the device last saw committed; kept for audit only
    pub previous_snapshot: Option<CartSnapshot>,
    pub strategy: Option<ResolutionStrategy>,
    /// Use the configured strategy when none is named
    pub auto_resolve: bool,
    pub user_choice: Option<Vec<CartItem>>,
    pub sync_type: SyncType,
    pub network_info: Option<NetworkInfo>,
}

impl SyncCartRequest {
    pub fn new(
        user_id: impl Into<UserId>,
        cart_id: impl Into<CartId>,
        device_id: impl Into<DeviceId>,
        snapshot: CartSnapshot,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            cart_id: cart_id.into(),
            device_id: device_id.into(),
            snapshot,
            previous_snapshot: None,
            strategy: None,
            auto_resolve: false,
            user_choice: None,
            sync_type: SyncType::default(),
            network_info: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_auto_resolve(mut self) -> Self {
        self.auto_resolve = true;
        self
    }

    pub fn with_user_choice(mut self, items: Vec<CartItem>) -> Self {
        self.user_choice = Some(items);
        self
    }
}

/// Result of a committed sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCartResponse {
    pub success: bool,
    pub sync_id: SyncId,
    pub resolved_snapshot: CartSnapshot,
    pub conflicts: Vec<Conflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResolutionStrategy>,
    /// Devices the new cart was pushed to
    pub delivered_to: Vec<DeviceId>,
    /// True when no other device was online and the push was queued
    pub queued: bool,
}

/// Transport settings handed to a device at initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub profile: NetworkProfile,
    pub heartbeat_interval_ms: u64,
    pub commit_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSyncInit {
    pub device: Device,
    pub pending_operations: Vec<OfflineQueueEntry>,
    pub sync_config: SyncConfig,
}

/// What one sweep cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_connections: usize,
    pub expired_conflicts: usize,
    pub pruned_deliveries: usize,
}

/// Orchestrates sync operations against the stores and live connections.
pub struct SyncCoordinator {
    stores: Stores,
    registry: Arc<ConnectionRegistry>,
    broadcaster: SyncBroadcaster,
    queue: OfflineQueue,
    settings: SyncSettings,
    cart_locks: DashMap<(UserId, CartId), Arc<Mutex<()>>>,
    /// Conflicted operations waiting for `resolve_conflicts`
    parked: DashMap<SyncId, SyncOperation>,
}

impl SyncCoordinator {
    pub fn new(stores: Stores, settings: SyncSettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            stores,
            broadcaster: SyncBroadcaster::new(registry.clone()),
            registry,
            queue: OfflineQueue::new(settings.offline_queue_capacity),
            settings,
            cart_locks: DashMap::new(),
            parked: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Register or refresh a device and hand it its sync configuration.
    ///
    /// Pushes queued while the user had no device online are returned as
    /// `pending_operations`, minus the ones this device produced itself.
    pub async fn initialize_device_sync(
        &self,
        user_id: &str,
        device_id: &str,
        attrs: DeviceAttributes,
    ) -> Result<DeviceSyncInit, SyncError> {
        require_id("userId", user_id)?;
        require_id("deviceId", device_id)?;

        let device = self.stores.devices.upsert(user_id, device_id, &attrs).await?;
        let profile = device.profile();
        self.registry.set_profile(user_id, device_id, profile);

        let pending_operations = self.take_pending(user_id, device_id);

        tracing::info!(
            user_id = %user_id,
            device_id = %device_id,
            network = %device.network_type,
            pending = pending_operations.len(),
            "Device sync initialized"
        );

        Ok(DeviceSyncInit {
            device,
            pending_operations,
            sync_config: SyncConfig {
                profile,
                heartbeat_interval_ms: self.heartbeat_interval_ms(),
                commit_timeout_ms: self.settings.commit_timeout.as_millis() as u64,
            },
        })
    }

    /// Run one sync request to completion.
    pub async fn sync_cart(&self, request: SyncCartRequest) -> Result<SyncCartResponse, SyncError> {
        require_id("userId", &request.user_id)?;
        require_id("cartId", &request.cart_id)?;
        require_id("deviceId", &request.device_id)?;
        request.snapshot.validate()?;

        let strategy = request.strategy.or(if request.auto_resolve {
            Some(self.settings.auto_resolve_strategy)
        } else {
            None
        });

        self.require_device(&request.user_id, &request.device_id)
            .await?;

        let now = now_millis();
        self.registry.touch(&request.user_id, &request.device_id, now);
        if let Some(info) = &request.network_info {
            self.registry.set_profile(
                &request.user_id,
                &request.device_id,
                profile_for(info.network_type, info.mobile_provider),
            );
        }

        let op = SyncOperation::new(
            uuid::Uuid::new_v4().to_string(),
            request.user_id,
            request.cart_id,
            request.device_id,
            request.snapshot,
            now,
        )
        .with_sync_type(request.sync_type)
        .with_previous(request.previous_snapshot)
        .with_network_info(request.network_info.unwrap_or_default());

        self.execute(op, strategy, request.user_choice.as_deref())
            .await
    }

    /// Finish a sync that was parked on conflicts.
    ///
    /// Conflicts are detected again against the cart as committed now; if
    /// they disappeared in the meantime the sync completes clean.
    pub async fn resolve_conflicts(
        &self,
        sync_id: &str,
        strategy: ResolutionStrategy,
        user_choice: Option<Vec<CartItem>>,
    ) -> Result<SyncCartResponse, SyncError> {
        if strategy == ResolutionStrategy::UserChoice {
            validate_choice(user_choice.as_deref())?;
        }

        let (_, parked) = self
            .parked
            .remove(sync_id)
            .ok_or_else(|| SyncError::NotFound(format!("pending sync {}", sync_id)))?;

        let op = SyncOperation::new(
            parked.id,
            parked.user_id,
            parked.cart_id,
            parked.device_id,
            parked.incoming_snapshot,
            now_millis(),
        )
        .with_sync_type(SyncType::ConflictResolution)
        .with_previous(parked.previous_snapshot)
        .with_network_info(parked.network_info);

        self.execute(op, Some(strategy), user_choice.as_deref())
            .await
    }

    async fn execute(
        &self,
        mut op: SyncOperation,
        strategy: Option<ResolutionStrategy>,
        user_choice: Option<&[CartItem]>,
    ) -> Result<SyncCartResponse, SyncError> {
        let lock = self.cart_lock(&op.user_id, &op.cart_id);
        let guard = lock.lock().await;
        let now = now_millis();

        let fetched = self.stores.carts.get_cart(&op.user_id, &op.cart_id).await;
        let current = match fetched {
            Ok(cart) => cart.unwrap_or_else(|| CartSnapshot::empty(op.received_at)),
            Err(e) => return self.abort(op, e.into()).await,
        };

        let conflicts = detect_conflicts(&current, &op.incoming_snapshot);
        op.record_conflicts(conflicts)?;

        let resolved = if !op.has_conflicts() {
            op.advance(SyncPhase::ResolvedClean)?;
            op.incoming_snapshot.clone()
        } else {
            let Some(strategy) = strategy else {
                return Err(self.park(op));
            };
            op.strategy = Some(strategy);
            let resolved = Resolver::new(strategy).resolve(
                &current,
                &op.incoming_snapshot,
                &op.conflicts,
                user_choice,
                now,
            );
            match resolved {
                Ok(snapshot) => {
                    op.advance(SyncPhase::ResolvedConflict)?;
                    snapshot
                }
                Err(e) => return self.abort(op, e.into()).await,
            }
        };

        let commit = self
            .stores
            .carts
            .replace_cart(&op.user_id, &op.cart_id, &resolved);
        let committed = tokio::time::timeout(self.settings.commit_timeout, commit).await;
        let committed = match committed {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.abort(op, e.into()).await,
            Err(_) => match self.confirm_commit(&op, &resolved).await {
                Some(snapshot) => snapshot,
                None => {
                    let err = SyncError::Persistence(format!(
                        "commit exceeded {}ms",
                        self.settings.commit_timeout.as_millis()
                    ));
                    return self.abort(op, err).await;
                }
            },
        };
        op.advance(SyncPhase::Committed)?;

        let message = if op.has_conflicts() {
            SyncMessage::conflict_resolved(committed.clone(), op.conflicts.clone(), &op.id, now)
        } else {
            SyncMessage::cart_sync(committed.clone(), &op.id, now)
        };

        let report = self
            .broadcaster
            .broadcast(&op.user_id, &op.device_id, &message)
            .await;
        let outcome = if report.had_no_targets() {
            let queue_len = self
                .queue
                .enqueue(&op.user_id, &op.device_id, message, now);
            SyncOutcome::Queued { queue_len }
        } else {
            SyncOutcome::Delivered {
                delivered: report.delivered,
                failed: report.failed,
            }
        };
        op.advance(SyncPhase::Broadcast)?;
        drop(guard);

        if let Err(e) = self.stores.devices.record_sync(&op.device_id, now).await {
            tracing::warn!(device_id = %op.device_id, "Failed to stamp device sync: {}", e);
        }

        op.advance(SyncPhase::Recorded)?;
        self.record(&op, outcome.clone(), now).await;

        tracing::info!(
            sync_id = %op.id,
            user_id = %op.user_id,
            device_id = %op.device_id,
            conflicts = op.conflicts.len(),
            strategy = ?op.strategy,
            outcome = outcome.as_str(),
            "Cart sync committed"
        );

        let (delivered_to, queued) = match outcome {
            SyncOutcome::Delivered { delivered, .. } => (delivered, false),
            _ => (Vec::new(), true),
        };

        Ok(SyncCartResponse {
            success: true,
            sync_id: op.id,
            resolved_snapshot: committed,
            conflicts: op.conflicts,
            strategy: op.strategy,
            delivered_to,
            queued,
        })
    }

    /// Check whether a commit that outran its deadline landed anyway.
    ///
    /// Runs under the cart lock, so the stored snapshot can only be ours or
    /// the one from before.
    async fn confirm_commit(
        &self,
        op: &SyncOperation,
        resolved: &CartSnapshot,
    ) -> Option<CartSnapshot> {
        let read = self.stores.carts.get_cart(&op.user_id, &op.cart_id);
        match tokio::time::timeout(self.settings.commit_timeout, read).await {
            Ok(Ok(Some(stored))) if &stored == resolved => {
                tracing::warn!(
                    sync_id = %op.id,
                    user_id = %op.user_id,
                    cart_id = %op.cart_id,
                    "Commit acknowledged late, continuing with stored cart"
                );
                Some(stored)
            }
            _ => None,
        }
    }

    fn park(&self, op: SyncOperation) -> SyncError {
        let sync_id = op.id.clone();
        let conflicts = op.conflicts.clone();

        tracing::info!(
            sync_id = %sync_id,
            user_id = %op.user_id,
            device_id = %op.device_id,
            conflicts = conflicts.len(),
            "Sync parked on unresolved conflicts"
        );

        self.parked.insert(sync_id.clone(), op);
        SyncError::ConflictUnresolved { sync_id, conflicts }
    }

    async fn abort<T>(&self, mut op: SyncOperation, err: SyncError) -> Result<T, SyncError> {
        op.fail();
        tracing::warn!(
            sync_id = %op.id,
            user_id = %op.user_id,
            device_id = %op.device_id,
            "Sync failed: {}",
            err
        );
        let outcome = SyncOutcome::Failed {
            reason: err.to_string(),
        };
        self.record(&op, outcome, now_millis()).await;
        Err(err)
    }

    /// Append the audit record. Audit failures never fail the sync.
    async fn record(&self, op: &SyncOperation, outcome: SyncOutcome, at: Timestamp) {
        let record = SyncRecord::new(op, outcome, at);
        if let Err(e) = self.stores.audit.record_sync(&record).await {
            tracing::warn!(sync_id = %op.id, "Failed to write sync audit record: {}", e);
        }
    }

    fn cart_lock(&self, user_id: &str, cart_id: &str) -> Arc<Mutex<()>> {
        self.cart_locks
            .entry((user_id.to_string(), cart_id.to_string()))
            .or_default()
            .value()
            .clone()
    }

    async fn require_device(&self, user_id: &str, device_id: &str) -> Result<Device, SyncError> {
        match self.stores.devices.get(device_id).await? {
            Some(device) if device.belongs_to(user_id) => Ok(device),
            _ => Err(SyncError::NotFound(format!(
                "device {} for user {}",
                device_id, user_id
            ))),
        }
    }

    /// Register a freshly opened transport and replay queued pushes to it.
    pub async fn on_connection_open(
        &self,
        user_id: &str,
        device_id: &str,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<ConnectionId, SyncError> {
        require_id("userId", user_id)?;
        require_id("deviceId", device_id)?;

        let profile = match self.stores.devices.get(device_id).await? {
            Some(device) if device.belongs_to(user_id) => device.profile(),
            _ => NetworkProfile::balanced(),
        };

        let conn_id = self
            .registry
            .register(user_id, device_id, transport, profile, now_millis());

        for entry in self.take_pending(user_id, device_id) {
            if let Err(e) = self
                .broadcaster
                .send_to(user_id, device_id, &entry.operation)
                .await
            {
                tracing::warn!(
                    conn_id = %conn_id,
                    sync_id = ?entry.operation.sync_id,
                    "Failed to replay queued push: {}",
                    e
                );
            }
        }

        Ok(conn_id)
    }

    /// Forget a closed transport.
    ///
    /// With a `conn_id` only that exact connection is removed, so the close
    /// of a replaced socket leaves its replacement alone.
    pub fn on_connection_close(&self, user_id: &str, device_id: &str, conn_id: Option<&str>) -> bool {
        match conn_id {
            Some(conn_id) => self
                .registry
                .unregister_connection(user_id, device_id, conn_id),
            None => self.registry.unregister(user_id, device_id),
        }
    }

    /// Record liveness. Returns false once the connection has been evicted.
    pub fn touch(&self, user_id: &str, device_id: &str) -> bool {
        self.registry.touch(user_id, device_id, now_millis())
    }

    pub fn acknowledge(&self, device_id: &str, sync_id: &str) -> bool {
        self.broadcaster
            .deliveries()
            .acknowledge(sync_id, device_id, now_millis())
    }

    pub fn delivery_status(&self, sync_id: &str) -> Option<HashMap<DeviceId, DeliveryState>> {
        self.broadcaster.deliveries().status(sync_id)
    }

    pub fn connected_devices(&self, user_id: &str) -> Vec<DeviceId> {
        self.registry.list_devices(user_id)
    }

    pub fn pending_conflicts(&self) -> usize {
        self.parked.len()
    }

    /// Drop idle connections, expire parked conflicts and old delivery
    /// state, and release unused cart locks.
    pub async fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        let idle_cutoff = now.saturating_sub(self.settings.heartbeat_timeout.as_millis() as u64);
        for (user_id, device_id, conn_id) in self.registry.idle_since(idle_cutoff) {
            if !self
                .registry
                .unregister_connection(&user_id, &device_id, &conn_id)
            {
                continue;
            }
            report.idle_connections += 1;
            tracing::info!(user_id = %user_id, device_id = %device_id, "Dropped idle connection");
            if let Err(e) = self.stores.devices.mark_inactive(&device_id).await {
                tracing::warn!(device_id = %device_id, "Failed to mark device inactive: {}", e);
            }
        }

        let ttl_cutoff = now.saturating_sub(self.settings.pending_conflict_ttl.as_millis() as u64);
        let expired: Vec<SyncId> = self
            .parked
            .iter()
            .filter(|entry| entry.received_at < ttl_cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for sync_id in expired {
            if let Some((_, mut op)) = self.parked.remove(&sync_id) {
                report.expired_conflicts += 1;
                op.fail();
                let outcome = SyncOutcome::Failed {
                    reason: "conflicts were not resolved in time".to_string(),
                };
                self.record(&op, outcome, now).await;
            }
        }

        report.pruned_deliveries = self.broadcaster.deliveries().prune(ttl_cutoff);
        self.cart_locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        if report != SweepReport::default() {
            tracing::debug!(
                idle = report.idle_connections,
                expired = report.expired_conflicts,
                pruned = report.pruned_deliveries,
                "Sweep finished"
            );
        }

        report
    }

    /// Drop every live connection.
    pub fn disconnect_all(&self) {
        self.registry.clear();
    }

    fn take_pending(&self, user_id: &str, device_id: &str) -> Vec<OfflineQueueEntry> {
        self.queue
            .drain(user_id)
            .into_iter()
            .filter(|entry| entry.origin_device_id != device_id)
            .collect()
    }

    fn heartbeat_interval_ms(&self) -> u64 {
        (self.settings.heartbeat_timeout.as_millis() as u64 / 3).max(1_000)
    }
}

fn require_id(field: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_choice(user_choice: Option<&[CartItem]>) -> Result<(), SyncError> {
    let items = user_choice.ok_or(cartsync_engine::Error::MissingUserChoice)?;
    CartSnapshot::from_items(items.to_vec(), 0).validate()?;
    Ok(())
}
