use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::app::payload::{PushPayload, CLICK_ACTION};

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECONDS: i64 = 3600;

/// Push-backend service account, parsed from the credential document held in
/// an environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

impl ServiceAccount {
    /// The credential travels through an env var that may mangle whitespace:
    /// control characters (other than tabs and line breaks) are stripped
    /// before parsing, and literal `\n` sequences in the private key are
    /// normalized to real newlines.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
            .collect();
        let mut account: ServiceAccount =
            serde_json::from_str(&cleaned).context("invalid service account document")?;
        account.private_key = account.private_key.replace("\\n", "\n");
        Ok(account)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges the service credential for a short-lived bearer token scoped to
/// the messaging API. No caching: every dispatch call performs one exchange.
#[derive(Clone)]
pub struct AccessTokenProvider {
    http: reqwest::Client,
    token_url: String,
}

impl AccessTokenProvider {
    pub fn new(http: reqwest::Client, token_url: String) -> Self {
        Self { http, token_url }
    }

    pub async fn fetch(&self, account: &ServiceAccount) -> Result<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AssertionClaims {
            iss: &account.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.token_url,
            iat: now,
            exp: now + ASSERTION_TTL_SECONDS,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .context("invalid service account private key")?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .context("failed to sign token assertion")?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("token exchange request failed")?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("token exchange returned a non-JSON body")?;
        if !status.is_success() {
            return Err(anyhow!("token exchange failed ({}): {}", status, body));
        }

        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("token exchange response missing access_token"))
    }
}

/// Thin client for the FCM v1 send endpoint. Returns the HTTP status and the
/// parsed response body; the caller classifies success and failure.
#[derive(Clone)]
pub struct FcmClient {
    http: reqwest::Client,
    endpoint: String,
}

impl FcmClient {
    pub fn new(http: reqwest::Client, endpoint: String) -> Self {
        Self { http, endpoint }
    }

    pub async fn send(
        &self,
        access_token: &str,
        project_id: &str,
        device_token: &str,
        payload: &PushPayload,
    ) -> Result<(u16, Value)> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint.trim_end_matches('/'),
            project_id
        );
        let message = json!({
            "message": {
                "token": device_token,
                "notification": {
                    "title": payload.title,
                    "body": payload.body,
                },
                "android": {
                    "priority": "high",
                    "notification": {
                        "channel_id": payload.channel_id,
                        "tag": payload.thread_key,
                        "click_action": CLICK_ACTION,
                        "default_sound": true,
                    },
                },
                "apns": {
                    "headers": { "apns-priority": "10" },
                    "payload": {
                        "aps": {
                            "thread-id": payload.thread_key,
                            "sound": "default",
                            "badge": 1,
                            "mutable-content": 1,
                        },
                    },
                },
                "data": payload.data,
            },
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&message)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

/// Whether a failure response reports the device token as permanently
/// invalid. Rate limiting and transient server errors do not qualify; those
/// registrations are left alone and retried on the next notification.
pub fn is_stale_token_error(body: &Value) -> bool {
    body["error"]["details"]
        .as_array()
        .map(|details| {
            details.iter().any(|detail| {
                matches!(
                    detail["errorCode"].as_str(),
                    Some("UNREGISTERED") | Some("INVALID_ARGUMENT")
                )
            })
        })
        .unwrap_or(false)
}

pub fn error_message(body: &Value) -> Option<String> {
    body["error"]["message"].as_str().map(str::to_string)
}
