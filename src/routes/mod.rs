//! API Routes
//!
//! - `/` and `/api/health` - diagnostics
//! - `/upload*`, `/download*` - file transfers
//! - `/objects*`, `/presign` - object management and presigned URLs

pub mod files;
pub mod health;
pub mod objects;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::apply_cors;
use crate::models::AppState;
use crate::types::{AppError, AppResult};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let max_upload_bytes = state.config.server.max_upload_bytes;
    let origins = state.config.server.cors_allowed_origins.clone();

    let router = Router::new()
        .merge(health::router(state.clone()))
        .merge(files::router(state.clone()))
        .merge(objects::router(state))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    apply_cors(router, &origins)
}

/// A non-blank request parameter, or a 400 naming it.
pub(crate) fn required(value: Option<String>, name: &str) -> AppResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest(format!("{} is required", name)))
}
