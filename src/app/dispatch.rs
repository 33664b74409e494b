use anyhow::{anyhow, Result};
use serde_json::json;
use sqlx::Row;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::devices::DeviceDirectory;
use crate::app::fcm::{self, AccessTokenProvider, FcmClient, ServiceAccount};
use crate::app::payload::{self, APP_NAME};
use crate::config::PushSettings;
use crate::domain::device::{DeviceOutcome, DispatchSummary};
use crate::domain::notification::PushRequest;
use crate::infra::db::Db;

/// First + last name, else handle, else the application name. Parts are
/// trimmed so a whitespace-only name column cannot produce a blank title.
pub fn compose_display_name(
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
) -> String {
    let full_name = [first_name, last_name]
        .into_iter()
        .flatten()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !full_name.is_empty() {
        return full_name;
    }
    match username {
        Some(username) if !username.trim().is_empty() => username.trim().to_string(),
        _ => APP_NAME.to_string(),
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Delivered(DispatchSummary),
    Skipped { reason: &'static str },
}

/// Orchestrates one "deliver this notification" call: device fan-out with
/// room suppression, one payload build, one token exchange, one send per
/// device, failure classification, and stale-token invalidation.
pub struct PushDispatcher {
    db: Db,
    directory: DeviceDirectory,
    tokens: AccessTokenProvider,
    fcm: FcmClient,
    service_account_json: Option<String>,
}

impl PushDispatcher {
    pub fn new(db: Db, http: reqwest::Client, settings: &PushSettings) -> Self {
        Self {
            directory: DeviceDirectory::new(db.clone()),
            tokens: AccessTokenProvider::new(http.clone(), settings.oauth_token_url.clone()),
            fcm: FcmClient::new(http, settings.fcm_endpoint.clone()),
            service_account_json: settings.service_account_json.clone(),
            db,
        }
    }

    /// Only missing/invalid credentials and the token exchange fail the whole
    /// call; everything past that degrades to partial per-device results.
    pub async fn deliver(&self, request: &PushRequest) -> Result<DispatchOutcome> {
        let raw_credential = self
            .service_account_json
            .as_deref()
            .ok_or_else(|| anyhow!("FCM_SERVICE_ACCOUNT_JSON is not set"))?;
        let account = ServiceAccount::parse(raw_credential)?;

        let devices = self
            .directory
            .resolve(request.user_id, request.room_id)
            .await;
        if devices.is_empty() {
            info!(user_id = %request.user_id, "no eligible devices, skipping push");
            return Ok(DispatchOutcome::Skipped {
                reason: "no_devices",
            });
        }

        let sender_name = self.sender_display_name(request.sender_id).await;
        let push = payload::build(request, &sender_name);
        let access_token = self.tokens.fetch(&account).await?;

        let mut results = Vec::with_capacity(devices.len());
        for device in &devices {
            let Some(device_token) = device.fcm_token.as_deref() else {
                continue;
            };

            match self
                .fcm
                .send(&access_token, &account.project_id, device_token, &push)
                .await
            {
                Ok((status, _)) if (200..300).contains(&status) => {
                    info!(
                        device_id = %device.device_id,
                        platform = device.platform.as_deref().unwrap_or("?"),
                        "push ok"
                    );
                    results.push(DeviceOutcome {
                        device_id: device.device_id.clone(),
                        platform: device.platform.clone(),
                        status,
                        success: true,
                        error: None,
                    });
                }
                Ok((status, body)) => {
                    error!(device_id = %device.device_id, status, body = %body, "push backend error");
                    results.push(DeviceOutcome {
                        device_id: device.device_id.clone(),
                        platform: device.platform.clone(),
                        status,
                        success: false,
                        error: fcm::error_message(&body),
                    });
                    if fcm::is_stale_token_error(&body) {
                        match self.directory.invalidate(device.id).await {
                            Ok(()) => {
                                info!(device_id = %device.device_id, "cleared stale push token")
                            }
                            Err(err) => {
                                warn!(error = ?err, device_id = %device.device_id, "failed to clear stale push token")
                            }
                        }
                    }
                }
                Err(err) => {
                    error!(error = ?err, device_id = %device.device_id, "push request failed");
                    results.push(DeviceOutcome {
                        device_id: device.device_id.clone(),
                        platform: device.platform.clone(),
                        status: 0,
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let sent = results.iter().filter(|r| r.success).count();
        let failed = results.len() - sent;
        info!(user_id = %request.user_id, sent, failed, "push summary");

        self.audit(request, sent, failed, devices.len()).await;

        Ok(DispatchOutcome::Delivered(DispatchSummary {
            sent,
            failed,
            total_devices: devices.len(),
            results,
        }))
    }

    /// Display name for the title: first + last name, else handle, else the
    /// application name. A lookup failure degrades to the fallback.
    async fn sender_display_name(&self, sender_id: Option<Uuid>) -> String {
        let Some(sender_id) = sender_id else {
            return APP_NAME.to_string();
        };

        let row = match sqlx::query(
            "SELECT username, first_name, last_name FROM profiles WHERE id = $1",
        )
        .bind(sender_id)
        .fetch_optional(self.db.pool())
        .await
        {
            Ok(row) => row,
            Err(err) => {
                warn!(error = ?err, sender_id = %sender_id, "sender lookup failed");
                return APP_NAME.to_string();
            }
        };

        let Some(row) = row else {
            return APP_NAME.to_string();
        };
        compose_display_name(
            row.get("first_name"),
            row.get("last_name"),
            row.get("username"),
        )
    }

    /// Best-effort audit entry; a write failure is logged and swallowed.
    async fn audit(&self, request: &PushRequest, sent: usize, failed: usize, total_devices: usize) {
        let level = if failed > 0 && sent == 0 {
            "warning"
        } else {
            "info"
        };
        let message = format!(
            "push: {} -> {} ({}/{} devices)",
            request.channel, request.user_id, sent, total_devices
        );
        let metadata = json!({
            "channel": request.channel,
            "type": request.notification_type,
            "sent": sent,
            "failed": failed,
            "total_devices": total_devices,
        });

        let result = sqlx::query(
            "INSERT INTO system_logs (level, message, feature, action, metadata, source) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(level)
        .bind(message)
        .bind("notification")
        .bind("send_push")
        .bind(metadata)
        .bind("push_dispatcher")
        .execute(self.db.pool())
        .await;

        if let Err(err) = result {
            warn!(error = ?err, "failed to write push audit log");
        }
    }
}
