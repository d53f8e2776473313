//! Database operations for the devices table.

use async_trait::async_trait;
use cartsync_engine::{NetworkType, Timestamp};
use sqlx::{PgPool, Row};

use crate::store::{Device, DeviceAttributes, DeviceStore, DeviceType, StoreError};

/// A stored device row from the database.
#[derive(Debug)]
struct StoredDevice {
    device_id: String,
    user_id: String,
    device_type: String,
    platform: Option<String>,
    app_version: Option<String>,
    network_type: String,
    mobile_provider: Option<String>,
    fingerprint: Option<String>,
    last_sync_at: Option<i64>,
    active: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDevice {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDevice {
            device_id: row.try_get("device_id")?,
            user_id: row.try_get("user_id")?,
            device_type: row.try_get("device_type")?,
            platform: row.try_get("platform")?,
            app_version: row.try_get("app_version")?,
            network_type: row.try_get("network_type")?,
            mobile_provider: row.try_get("mobile_provider")?,
            fingerprint: row.try_get("fingerprint")?,
            last_sync_at: row.try_get("last_sync_at")?,
            active: row.try_get("active")?,
        })
    }
}

impl StoredDevice {
    fn into_device(self) -> Device {
        Device {
            device_id: self.device_id,
            user_id: self.user_id,
            device_type: self.device_type.parse().unwrap_or_default(),
            platform: self.platform,
            app_version: self.app_version,
            network_type: NetworkType::parse(Some(&self.network_type)),
            mobile_provider: self.mobile_provider.and_then(|p| p.parse().ok()),
            fingerprint: self.fingerprint,
            last_sync_at: self.last_sync_at.map(|t| t.max(0) as Timestamp),
            active: self.active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn upsert(
        &self,
        user_id: &str,
        device_id: &str,
        attrs: &DeviceAttributes,
    ) -> Result<Device, StoreError> {
        let stored = sqlx::query_as::<_, StoredDevice>(
            r#"
            INSERT INTO devices (
                device_id, user_id, device_type, platform, app_version,
                network_type, mobile_provider, fingerprint, active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)
            ON CONFLICT (device_id) DO UPDATE SET
                device_type = EXCLUDED.device_type,
                platform = EXCLUDED.platform,
                app_version = EXCLUDED.app_version,
                network_type = EXCLUDED.network_type,
                mobile_provider = EXCLUDED.mobile_provider,
                fingerprint = EXCLUDED.fingerprint,
                active = TRUE
            WHERE devices.user_id = EXCLUDED.user_id
            RETURNING device_id, user_id, device_type, platform, app_version,
                      network_type, mobile_provider, fingerprint, last_sync_at, active
            "#,
        )
        .bind(device_id)
        .bind(user_id)
        .bind(attrs.device_type.as_str())
        .bind(&attrs.platform)
        .bind(&attrs.app_version)
        .bind(attrs.network_type.as_str())
        .bind(attrs.mobile_provider.map(|p| p.as_str()))
        .bind(&attrs.fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        // The guarded update returns no row when another user owns the id
        stored
            .map(StoredDevice::into_device)
            .ok_or_else(|| StoreError::DeviceOwnedElsewhere(device_id.to_string()))
    }

    async fn get(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        let stored = sqlx::query_as::<_, StoredDevice>(
            r#"
            SELECT device_id, user_id, device_type, platform, app_version,
                   network_type, mobile_provider, fingerprint, last_sync_at, active
            FROM devices
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stored.map(StoredDevice::into_device))
    }

    async fn mark_inactive(&self, device_id: &str) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE devices SET active = FALSE WHERE device_id = $1"#)
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_sync(&self, device_id: &str, at: Timestamp) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE devices SET last_sync_at = $2 WHERE device_id = $1"#)
            .bind(device_id)
            .bind(at as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartsync_engine::MobileProvider;

    #[test]
    fn stored_row_maps_to_device() {
        let stored = StoredDevice {
            device_id: "phone".into(),
            user_id: "user-1".into(),
            device_type: "mobile".into(),
            platform: Some("android".into()),
            app_version: None,
            network_type: "3g".into(),
            mobile_provider: Some("robi".into()),
            fingerprint: None,
            last_sync_at: Some(42),
            active: true,
        };

        let device = stored.into_device();
        assert_eq!(device.device_type, DeviceType::Mobile);
        assert_eq!(device.network_type, NetworkType::ThreeG);
        assert_eq!(device.mobile_provider, Some(MobileProvider::Robi));
        assert_eq!(device.last_sync_at, Some(42));
    }

    #[test]
    fn unknown_labels_degrade_gracefully() {
        let stored = StoredDevice {
            device_id: "tv".into(),
            user_id: "user-1".into(),
            device_type: "television".into(),
            platform: None,
            app_version: None,
            network_type: "satellite".into(),
            mobile_provider: None,
            fingerprint: None,
            last_sync_at: None,
            active: false,
        };

        let device = stored.into_device();
        assert_eq!(device.device_type, DeviceType::Unknown);
        assert_eq!(device.network_type, NetworkType::Unknown);
    }
}
