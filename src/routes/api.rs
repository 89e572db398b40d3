use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, avatar};
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/api/avatar/config", get(avatar::get_avatar_config))
        .layer(TraceLayer::new_for_http())
}
