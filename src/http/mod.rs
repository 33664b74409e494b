use axum::Router;
use tower_http::cors::CorsLayer;

use crate::AppState;

mod error;
mod handlers;
mod routes;

pub use error::AppError;
pub use handlers::parse_dispatch_request;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::push())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
