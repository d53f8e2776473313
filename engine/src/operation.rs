//! Sync operations and their lifecycle.
//!
//! One [`SyncOperation`] is created per sync request. It walks a fixed
//! sequence of [`SyncPhase`]s and ends either fully recorded or failed:
//!
//! ```text
//! received -> conflict_checked -> resolved_clean    -> committed -> broadcast -> recorded
//!                              \-> resolved_conflict /
//! ```
//!
//! Any phase before `recorded` may move to `failed`.

use crate::{
    error::Result, CartId, CartSnapshot, Conflict, DeviceId, Error, MobileProvider, NetworkType,
    ResolutionStrategy, SyncId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the device is syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// The device sends its whole cart, e.g. after reconnecting
    #[default]
    Full,
    /// The device sends its cart after a local edit
    Incremental,
    /// A parked conflict is being settled
    ConflictResolution,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
            SyncType::ConflictResolution => "conflict_resolution",
        }
    }
}

/// Connectivity reported alongside a sync request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    #[serde(default)]
    pub network_type: NetworkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_provider: Option<MobileProvider>,
}

/// Lifecycle phase of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Received,
    ConflictChecked,
    ResolvedClean,
    ResolvedConflict,
    Committed,
    Broadcast,
    Recorded,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Received => "received",
            SyncPhase::ConflictChecked => "conflict_checked",
            SyncPhase::ResolvedClean => "resolved_clean",
            SyncPhase::ResolvedConflict => "resolved_conflict",
            SyncPhase::Committed => "committed",
            SyncPhase::Broadcast => "broadcast",
            SyncPhase::Recorded => "recorded",
            SyncPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Recorded | SyncPhase::Failed)
    }

    /// Structural transition check; conflict-dependent rules live on
    /// [`SyncOperation::advance`].
    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Received, ConflictChecked) => true,
            (ConflictChecked, ResolvedClean | ResolvedConflict) => true,
            (ResolvedClean | ResolvedConflict, Committed) => true,
            (Committed, Broadcast) => true,
            (Broadcast, Recorded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sync request moving through the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: SyncId,
    pub user_id: UserId,
    pub cart_id: CartId,
    pub device_id: DeviceId,
    pub sync_type: SyncType,
    pub incoming_snapshot: CartSnapshot,
    /// What the device believed was committed; informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_snapshot: Option<CartSnapshot>,
    #[serde(default)]
    pub network_info: NetworkInfo,
    pub phase: SyncPhase,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResolutionStrategy>,
    pub received_at: Timestamp,
}

impl SyncOperation {
    pub fn new(
        id: impl Into<SyncId>,
        user_id: impl Into<UserId>,
        cart_id: impl Into<CartId>,
        device_id: impl Into<DeviceId>,
        incoming_snapshot: CartSnapshot,
        received_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            cart_id: cart_id.into(),
            device_id: device_id.into(),
            sync_type: SyncType::default(),
            incoming_snapshot,
            previous_snapshot: None,
            network_info: NetworkInfo::default(),
            phase: SyncPhase::Received,
            conflicts: Vec::new(),
            strategy: None,
            received_at,
        }
    }

    pub fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }

    pub fn with_previous(mut self, previous: Option<CartSnapshot>) -> Self {
        self.previous_snapshot = previous;
        self
    }

    pub fn with_network_info(mut self, network_info: NetworkInfo) -> Self {
        self.network_info = network_info;
        self
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Move to `next`, enforcing the lifecycle.
    ///
    /// `resolved_clean` is only reachable with no conflicts and
    /// `resolved_conflict` only with a non-empty set and a chosen strategy.
    pub fn advance(&mut self, next: SyncPhase) -> Result<()> {
        let allowed = self.phase.can_transition_to(next)
            && match next {
                SyncPhase::ResolvedClean => self.conflicts.is_empty(),
                SyncPhase::ResolvedConflict => self.has_conflicts() && self.strategy.is_some(),
                _ => true,
            };

        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        self.phase = next;
        Ok(())
    }

    /// Record detector output and move to `conflict_checked`.
    pub fn record_conflicts(&mut self, conflicts: Vec<Conflict>) -> Result<()> {
        self.advance(SyncPhase::ConflictChecked)?;
        self.conflicts = conflicts;
        Ok(())
    }

    /// Mark the operation failed. Terminal operations stay as they are.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = SyncPhase::Failed;
        }
    }
}
