use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use axum::{
    extract::{Multipart, Path as UrlPath, Query, State},
    routing::{get, post, put},
    Router,
};
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use super::required;
use crate::models::{AppState, BucketParams, DownloadParams, PresignedUploadParams, UploadPathParams};
use crate::transfer::TransferOutcome;
use crate::types::{AppError, AppResult, PresignMethod, StorageError};

const NO_FILE_SELECTED: &str = "No file selected for upload.";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/upload2", post(upload_from_path))
        .route("/upload3", post(upload_bytes))
        .route("/upload4", put(upload_presigned))
        .route("/download", get(download_object))
        .route("/download/{key}", get(download_file))
        .with_state(state)
}

/// File part of a multipart form.
struct FormFile {
    file_name: String,
    data: Bytes,
}

/// A multipart form: at most one file plus text fields.
#[derive(Default)]
struct UploadForm {
    file: Option<FormFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let data = field.bytes().await?;
                    if form.file.is_none() || name == "file" {
                        form.file = Some(FormFile {
                            file_name: sanitize_file_name(&file_name),
                            data,
                        });
                    }
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// Form field `name`, falling back to the query string.
    fn param(&self, name: &str, query: Option<String>) -> AppResult<String> {
        self.fields
            .get(name)
            .cloned()
            .or(query)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::InvalidRequest(format!("{} is required", name)))
    }

    fn file(&self) -> AppResult<&FormFile> {
        self.file
            .as_ref()
            .ok_or_else(|| AppError::InvalidRequest(NO_FILE_SELECTED.to_string()))
    }
}

/// Keep only the last path component of a client-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    name.rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// A backend rejection of a single-shot transfer, keeping the backend's reason.
fn rejected(reason: StorageError, context: String) -> AppError {
    StorageError::TransferFailed {
        status: reason.status(),
        message: format!("{}: {}", context, reason),
    }
    .into()
}

/// POST /upload - store the form file under a fresh random key.
async fn upload(
    State(state): State<AppState>,
    Query(params): Query<BucketParams>,
    multipart: Multipart,
) -> AppResult<String> {
    let form = UploadForm::read(multipart).await?;
    let file = form.file()?;
    if file.data.is_empty() {
        return Err(AppError::InvalidRequest(NO_FILE_SELECTED.to_string()));
    }
    let bucket = form.param("bucketName", params.bucket_name)?;
    let key = Uuid::new_v4().to_string();

    info!(bucket = %bucket, key = %key, size = file.data.len(), "Upload request received");
    let mut reader = Cursor::new(file.data.clone());
    state.transfers.upload_stream(&bucket, &key, &mut reader).await?;

    Ok(format!(
        "File uploaded successfully to S3 bucket: {}, Key: {}",
        bucket, key
    ))
}

/// POST /upload2 - single-shot upload of a file already on the server's disk.
async fn upload_from_path(
    State(state): State<AppState>,
    Query(params): Query<UploadPathParams>,
) -> AppResult<String> {
    let path = params
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest(NO_FILE_SELECTED.to_string()))?;
    let bucket = required(params.bucket_name, "bucketName")?;
    let object_name = required(params.object_name, "objectName")?;

    let outcome = state
        .transfers
        .upload_object(&bucket, &object_name, Path::new(&path))
        .await?;
    if let TransferOutcome::Rejected(reason) = outcome {
        return Err(rejected(
            reason,
            format!("Could not upload {} to {}", object_name, bucket),
        ));
    }

    Ok(format!(
        "File uploaded successfully to S3 bucket: {}, Key: {}",
        bucket, object_name
    ))
}

/// POST /upload3 - upload the form file under its own name and return its URI.
async fn upload_bytes(
    State(state): State<AppState>,
    Query(params): Query<BucketParams>,
    multipart: Multipart,
) -> AppResult<String> {
    let form = UploadForm::read(multipart).await?;
    let file = form.file()?;
    let bucket = form.param("bucketName", params.bucket_name)?;

    let uri = state
        .storage
        .upload_bytes(&bucket, &file.file_name, &file.data)
        .await?;
    Ok(uri)
}

/// PUT /upload4 - presign a PUT for the form file's name, then stream
/// `filePath/<file name>` from local disk to it.
async fn upload_presigned(
    State(state): State<AppState>,
    Query(params): Query<PresignedUploadParams>,
    multipart: Multipart,
) -> AppResult<String> {
    let form = UploadForm::read(multipart).await?;
    let file = form.file()?;
    let bucket = form.param("bucketName", params.bucket_name)?;
    let directory = form.param("filePath", params.file_path)?;
    let local_path = PathBuf::from(directory).join(&file.file_name);

    let presigned = state
        .storage
        .generate_presigned_url(
            &bucket,
            &file.file_name,
            PresignMethod::Put,
            state.config.presign.expiry(),
        )
        .await?;
    state.uploader.upload(&local_path, &presigned).await?;

    Ok("Upload succeeded.".to_string())
}

/// GET /download/{key} - managed download to `destinationPath`.
async fn download_file(
    State(state): State<AppState>,
    UrlPath(key): UrlPath<String>,
    Query(params): Query<DownloadParams>,
) -> AppResult<String> {
    let bucket = required(params.bucket_name, "bucketName")?;
    let destination = required(params.destination_path, "destinationPath")?;

    state
        .transfers
        .download_file(&bucket, &key, Path::new(&destination))
        .await?;

    Ok(format!(
        "File downloaded successfully from S3 bucket: {}, Key: {}",
        bucket, key
    ))
}

/// GET /download - single-shot download to `destinationPath/objectName`.
async fn download_object(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> AppResult<String> {
    let bucket = required(params.bucket_name, "bucketName")?;
    let object_name = required(params.object_name, "objectName")?;
    let destination = required(params.destination_path, "destinationPath")?;

    let outcome = state
        .transfers
        .download_object(&bucket, &object_name, Path::new(&destination))
        .await?;
    if let TransferOutcome::Rejected(reason) = outcome {
        return Err(rejected(reason, format!("Error saving {}", object_name)));
    }

    Ok(format!(
        "File downloaded successfully from S3 bucket: {}, Object Name: {}",
        bucket, object_name
    ))
}
