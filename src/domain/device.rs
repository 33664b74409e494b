use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One installed app instance capable of receiving push.
///
/// A registration with a null token or `push_enabled = false` is never
/// selected for delivery; the directory nulls the token and disables push
/// when the backend reports it permanently invalid.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub fcm_token: Option<String>,
    pub push_enabled: bool,
    pub current_room_id: Option<Uuid>,
    pub platform: Option<String>,
}

/// Per-device outcome of one dispatch call. `status` is the HTTP status from
/// the push backend, or 0 when the request never produced a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device_id: String,
    pub platform: Option<String>,
    pub status: u16,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub total_devices: usize,
    pub results: Vec<DeviceOutcome>,
}
