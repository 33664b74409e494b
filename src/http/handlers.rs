use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::app::dispatch::{DispatchOutcome, PushDispatcher};
use crate::domain::device::DeviceOutcome;
use crate::domain::notification::PushRequest;
use crate::http::AppError;
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.db.ping().await.is_ok() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse { status })
}

#[derive(Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<DeviceOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

pub(crate) async fn dispatch_push(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<DispatchResponse>, AppError> {
    let request = parse_dispatch_request(&body)?;
    info!(
        user_id = %request.user_id,
        channel = %request.channel,
        notification_type = request.notification_type.as_deref().unwrap_or("n/a"),
        "processing push dispatch"
    );

    let dispatcher = PushDispatcher::new(state.db.clone(), state.http.clone(), &state.push);
    match dispatcher.deliver(&request).await {
        Ok(DispatchOutcome::Delivered(summary)) => Ok(Json(DispatchResponse {
            success: true,
            sent: Some(summary.sent),
            failed: Some(summary.failed),
            results: Some(summary.results),
            skipped: None,
            reason: None,
        })),
        Ok(DispatchOutcome::Skipped { reason }) => Ok(Json(DispatchResponse {
            success: true,
            sent: None,
            failed: None,
            results: None,
            skipped: Some(true),
            reason: Some(reason),
        })),
        Err(err) => {
            error!(error = ?err, "push dispatch failed");
            Err(AppError::internal(err.to_string()))
        }
    }
}

/// Normalize the two accepted body shapes into one canonical request: a
/// webhook envelope carrying the notification under `record`, or the flat
/// notification itself (discriminated by a top-level `user_id`).
pub fn parse_dispatch_request(raw: &str) -> Result<PushRequest, AppError> {
    let Some(value) = lenient_parse_json(raw) else {
        return Err(AppError::bad_request("malformed JSON payload"));
    };

    let record = if let Some(record) = value.get("record") {
        record.clone()
    } else if value.get("user_id").is_some() {
        value
    } else {
        return Err(AppError::bad_request(
            "invalid payload: missing record.user_id",
        ));
    };

    serde_json::from_value(record)
        .map_err(|err| AppError::bad_request(format!("invalid payload: {}", err)))
}

/// Webhook bodies occasionally arrive with stray control characters or
/// logging prefixes around the JSON document, so parsing gets three tries:
/// verbatim, control-char-stripped, then the first-brace..last-brace slice.
fn lenient_parse_json(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }

    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
        .map(|c| if c == '\t' { ' ' } else { c })
        .collect();
    if let Ok(value) = serde_json::from_str(&stripped) {
        return Some(value);
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
