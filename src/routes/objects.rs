//! Object management endpoints
//!
//! - `GET /objects/count` - count objects under a prefix
//! - `DELETE /object/{*key}` - delete one object
//! - `DELETE /objects` - delete by `s3://` URI or by prefix
//! - `GET /presign` - issue a presigned URL

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use tracing::info;

use super::required;
use crate::models::{AppState, BucketParams, CountResponse, DeleteResponse, PrefixParams, PresignParams};
use crate::presign::PresignedUrl;
use crate::types::{AppResult, PresignMethod};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/objects/count", get(count_objects))
        .route("/objects", delete(delete_objects))
        .route("/object/{*key}", delete(delete_object))
        .route("/presign", get(presign))
        .with_state(state)
}

async fn count_objects(
    State(state): State<AppState>,
    Query(params): Query<PrefixParams>,
) -> AppResult<Json<CountResponse>> {
    let bucket = required(params.bucket_name, "bucketName")?;
    let prefix = params.prefix.unwrap_or_default();

    let count = state.storage.count_objects(&bucket, &prefix).await?;
    Ok(Json(CountResponse { bucket, prefix, count }))
}

async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<BucketParams>,
) -> AppResult<StatusCode> {
    let bucket = required(params.bucket_name, "bucketName")?;
    state.storage.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete by `uri`, or everything under a non-empty `prefix`.
async fn delete_objects(
    State(state): State<AppState>,
    Query(params): Query<PrefixParams>,
) -> AppResult<Response> {
    if let Some(uri) = params.uri.filter(|u| !u.trim().is_empty()) {
        state.storage.delete_object_by_uri(&uri).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let bucket = required(params.bucket_name, "bucketName")?;
    // An empty prefix would wipe the bucket.
    let prefix = required(params.prefix, "prefix")?;

    let deleted = state.storage.delete_objects_by_prefix(&bucket, &prefix).await?;
    info!(bucket = %bucket, prefix = %prefix, deleted, "Prefix delete finished");
    Ok(Json(DeleteResponse {
        bucket,
        prefix,
        deleted,
    })
    .into_response())
}

async fn presign(
    State(state): State<AppState>,
    Query(params): Query<PresignParams>,
) -> AppResult<Json<PresignedUrl>> {
    let bucket = required(params.bucket_name, "bucketName")?;
    let key = required(params.key, "key")?;
    let method = match params.method {
        Some(m) => m.parse::<PresignMethod>()?,
        None => PresignMethod::Put,
    };
    let valid_for = params
        .expires_in_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.presign.expiry());

    let presigned = state
        .storage
        .generate_presigned_url(&bucket, &key, method, valid_for)
        .await?;
    Ok(Json(presigned))
}
