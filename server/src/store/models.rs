//! Records owned by the persistence collaborators.

use cartsync_engine::{
    profile_for, CartId, DeviceId, MobileProvider, NetworkProfile, NetworkType,
    ResolutionStrategy, SyncId, SyncOperation, SyncPhase, SyncType, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Form factor of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl FromStr for DeviceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mobile" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            "desktop" => DeviceType::Desktop,
            _ => DeviceType::Unknown,
        })
    }
}

/// What a device reports about itself when it starts syncing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub device_type: DeviceType,
    pub platform: Option<String>,
    pub app_version: Option<String>,
    pub network_type: NetworkType,
    pub mobile_provider: Option<MobileProvider>,
    pub fingerprint: Option<String>,
}

/// A known device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: DeviceId,
    pub user_id: UserId,
    pub device_type: DeviceType,
    pub platform: Option<String>,
    pub app_version: Option<String>,
    pub network_type: NetworkType,
    pub mobile_provider: Option<MobileProvider>,
    pub fingerprint: Option<String>,
    pub last_sync_at: Option<Timestamp>,
    pub active: bool,
}

impl Device {
    /// A fresh, active device built from its reported attributes.
    pub fn new(user_id: &str, device_id: &str, attrs: &DeviceAttributes) -> Self {
        Self {
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            device_type: attrs.device_type,
            platform: attrs.platform.clone(),
            app_version: attrs.app_version.clone(),
            network_type: attrs.network_type,
            mobile_provider: attrs.mobile_provider,
            fingerprint: attrs.fingerprint.clone(),
            last_sync_at: None,
            active: true,
        }
    }

    /// Overwrite reported attributes and reactivate; sync history is kept.
    pub fn apply(&mut self, attrs: &DeviceAttributes) {
        self.device_type = attrs.device_type;
        self.platform = attrs.platform.clone();
        self.app_version = attrs.app_version.clone();
        self.network_type = attrs.network_type;
        self.mobile_provider = attrs.mobile_provider;
        self.fingerprint = attrs.fingerprint.clone();
        self.active = true;
    }

    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn profile(&self) -> NetworkProfile {
        profile_for(self.network_type, self.mobile_provider)
    }
}

/// How a sync operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncOutcome {
    /// Pushed to the user's other connected devices
    Delivered {
        delivered: Vec<DeviceId>,
        failed: Vec<DeviceId>,
    },
    /// No other device online; parked in the offline queue
    Queued { queue_len: usize },
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Delivered { .. } => "delivered",
            SyncOutcome::Queued { .. } => "queued",
            SyncOutcome::Failed { .. } => "failed",
        }
    }
}

/// Immutable audit entry, one per finished sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub sync_id: SyncId,
    pub user_id: UserId,
    pub cart_id: CartId,
    pub device_id: DeviceId,
    pub sync_type: SyncType,
    pub phase: SyncPhase,
    pub strategy: Option<ResolutionStrategy>,
    pub conflict_count: usize,
    pub outcome: SyncOutcome,
    pub recorded_at: Timestamp,
}

impl SyncRecord {
    pub fn new(op: &SyncOperation, outcome: SyncOutcome, recorded_at: Timestamp) -> Self {
        Self {
            sync_id: op.id.clone(),
            user_id: op.user_id.clone(),
            cart_id: op.cart_id.clone(),
            device_id: op.device_id.clone(),
            sync_type: op.sync_type,
            phase: op.phase,
            strategy: op.strategy,
            conflict_count: op.conflicts.len(),
            outcome,
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_deserialize_with_defaults() {
        let attrs: DeviceAttributes =
            serde_json::from_str(r#"{"deviceType": "mobile", "networkType": "3g"}"#).unwrap();
        assert_eq!(attrs.device_type, DeviceType::Mobile);
        assert_eq!(attrs.network_type, NetworkType::ThreeG);
        assert!(attrs.platform.is_none());

        let attrs: DeviceAttributes = serde_json::from_str(r#"{"deviceType": "watch"}"#).unwrap();
        assert_eq!(attrs.device_type, DeviceType::Unknown);
    }

    #[test]
    fn apply_keeps_sync_history() {
        let mut device = Device::new("user-1", "phone", &DeviceAttributes::default());
        device.last_sync_at = Some(10);
        device.active = false;

        device.apply(
            &DeviceAttributes {
                network_type: NetworkType::Wifi,
                ..Default::default()
            },
        );
        assert_eq!(device.last_sync_at, Some(10));
        assert!(device.active);
        assert_eq!(device.profile(), profile_for(NetworkType::Wifi, None));
    }

    #[test]
    fn outcome_wire_format() {
        let json = serde_json::to_value(SyncOutcome::Queued { queue_len: 3 }).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["queueLen"], 3);
    }
}
