use axum::{routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn push() -> Router<AppState> {
    Router::new().route("/v1/push/dispatch", post(handlers::dispatch_push))
}
