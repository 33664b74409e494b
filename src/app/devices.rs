use anyhow::Result;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::device::DeviceRegistration;
use crate::infra::db::Db;

/// Fixed device identifier for the synthetic legacy-profile registration.
const LEGACY_DEVICE_ID: &str = "legacy_profile";

#[derive(Clone)]
pub struct DeviceDirectory {
    db: Db,
}

impl DeviceDirectory {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Push-eligible registrations for a user: enabled, tokened, and not
    /// actively viewing `suppress_room_id`. Accounts that never migrated to
    /// multi-device registration fall back to the legacy per-profile token.
    ///
    /// Lookup failures degrade to an empty result (the dispatch becomes a
    /// skip) rather than failing the call.
    pub async fn resolve(
        &self,
        user_id: Uuid,
        suppress_room_id: Option<Uuid>,
    ) -> Vec<DeviceRegistration> {
        let query = match suppress_room_id {
            Some(room_id) => sqlx::query(
                "SELECT id, user_id, device_id, fcm_token, push_enabled, current_room_id, platform \
                 FROM user_devices \
                 WHERE user_id = $1 \
                   AND push_enabled \
                   AND fcm_token IS NOT NULL \
                   AND (current_room_id IS NULL OR current_room_id <> $2)",
            )
            .bind(user_id)
            .bind(room_id),
            None => sqlx::query(
                "SELECT id, user_id, device_id, fcm_token, push_enabled, current_room_id, platform \
                 FROM user_devices \
                 WHERE user_id = $1 \
                   AND push_enabled \
                   AND fcm_token IS NOT NULL",
            )
            .bind(user_id),
        };

        let devices = match query.fetch_all(self.db.pool()).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| DeviceRegistration {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    device_id: row.get("device_id"),
                    fcm_token: row.get("fcm_token"),
                    push_enabled: row.get("push_enabled"),
                    current_room_id: row.get("current_room_id"),
                    platform: row.get("platform"),
                })
                .collect::<Vec<_>>(),
            Err(err) => {
                warn!(error = ?err, user_id = %user_id, "device registration lookup failed");
                Vec::new()
            }
        };

        if !devices.is_empty() {
            return devices;
        }

        self.legacy_fallback(user_id).await
    }

    async fn legacy_fallback(&self, user_id: Uuid) -> Vec<DeviceRegistration> {
        let row = match sqlx::query(
            "SELECT id, fcm_token, push_enabled FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await
        {
            Ok(row) => row,
            Err(err) => {
                warn!(error = ?err, user_id = %user_id, "legacy profile lookup failed");
                return Vec::new();
            }
        };

        let Some(row) = row else {
            return Vec::new();
        };
        let fcm_token: Option<String> = row.get("fcm_token");
        let push_enabled: Option<bool> = row.get("push_enabled");
        let Some(fcm_token) = fcm_token else {
            return Vec::new();
        };
        if !push_enabled.unwrap_or(true) {
            return Vec::new();
        }

        info!(user_id = %user_id, "using legacy profile token fallback");
        vec![DeviceRegistration {
            id: row.get("id"),
            user_id,
            device_id: LEGACY_DEVICE_ID.to_string(),
            fcm_token: Some(fcm_token),
            push_enabled: true,
            current_room_id: None,
            platform: None,
        }]
    }

    /// Null the token and disable push for one registration. Idempotent; a
    /// re-issued invalidation is a no-op.
    pub async fn invalidate(&self, registration_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE user_devices SET fcm_token = NULL, push_enabled = FALSE WHERE id = $1",
        )
        .bind(registration_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
