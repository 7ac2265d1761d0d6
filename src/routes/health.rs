use axum::{extract::State, routing::get, Json, Router};

use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(signature_version))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/// Reports the signature version of the shared storage client.
async fn signature_version(State(state): State<AppState>) -> String {
    format!("Signature Version: {}", state.storage.signature_version())
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage: state.config.s3.provider.as_str().to_string(),
        region: state.storage.region(),
    };

    Json(response)
}
