use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Settings the Push Dispatcher needs beyond the database connection.
///
/// The service-account document is kept as the raw env string and parsed per
/// dispatch call, so a missing or mangled credential surfaces as a structured
/// error response instead of a startup crash.
#[derive(Clone, Debug)]
pub struct PushSettings {
    pub service_account_json: Option<String>,
    pub fcm_endpoint: String,
    pub oauth_token_url: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub http_client_timeout_seconds: u64,
    pub dispatch_url: String,
    pub push: PushSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode = env_or("APP_MODE", "api");

        let push = PushSettings {
            service_account_json: std::env::var("FCM_SERVICE_ACCOUNT_JSON")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            fcm_endpoint: env_or("FCM_ENDPOINT", DEFAULT_FCM_ENDPOINT),
            oauth_token_url: env_or("OAUTH_TOKEN_URL", DEFAULT_OAUTH_TOKEN_URL),
        };

        Ok(Self {
            http_addr,
            app_mode,
            database_url: env_or_err("DATABASE_URL")?,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            http_client_timeout_seconds: env_or_parse("HTTP_CLIENT_TIMEOUT_SECONDS", "30")?,
            dispatch_url: env_or("DISPATCH_URL", "http://127.0.0.1:8080/v1/push/dispatch"),
            push,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
