//! Presigned-URL workflow
//!
//! URLs are signed through [`crate::storage::Storage::generate_presigned_url`];
//! this module holds the resulting [`PresignedUrl`] and the uploader that
//! streams a local file straight to such a URL, so the bytes never pass
//! through the storage client.
//!
//! The upload body is read in fixed-size chunks, so memory use is bounded by
//! the chunk size no matter how large the file is.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_LENGTH;
use serde::Serialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::storage::ObjectRef;
use crate::types::{PresignMethod, StorageError, StorageResult};

/// A time-limited URL authorizing one method on one object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrl {
    pub url: String,
    pub method: PresignMethod,
    #[serde(flatten)]
    pub object: ObjectRef,
    pub expires_at: DateTime<Utc>,
}

impl PresignedUrl {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Streams local files to presigned URLs.
#[derive(Clone)]
pub struct PresignedUploader {
    client: reqwest::Client,
    chunk_size: usize,
}

impl PresignedUploader {
    pub fn new(chunk_size: usize, timeout: Duration) -> StorageResult<Self> {
        if chunk_size == 0 {
            return Err(StorageError::InvalidInput("chunk size must be greater than zero".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::BackendUnavailable(format!("building HTTP client: {}", e)))?;
        Ok(Self { client, chunk_size })
    }

    /// Send the file at `path` as the body of a `presigned.method` request.
    ///
    /// Fails with [`StorageError::LocalFile`] when the file cannot be read,
    /// [`StorageError::BackendUnavailable`] on transport errors and
    /// [`StorageError::TransferFailed`] when the backend answers non-2xx.
    pub async fn upload(&self, path: &Path, presigned: &PresignedUrl) -> StorageResult<()> {
        if presigned.is_expired_at(Utc::now()) {
            return Err(StorageError::InvalidInput(format!(
                "presigned URL for {} expired at {}",
                presigned.object, presigned.expires_at
            )));
        }

        let file = File::open(path)
            .await
            .map_err(|e| StorageError::local_file(path, e))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| StorageError::local_file(path, e))?
            .len();

        let body = reqwest::Body::wrap_stream(ReaderStream::with_capacity(file, self.chunk_size));
        let response = self
            .client
            .request(presigned.method.into(), &presigned.url)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable(format!("request to presigned URL failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(object = %presigned.object, %status, "Upload failed.");
            return Err(StorageError::TransferFailed {
                status: Some(status.as_u16()),
                message,
            });
        }

        info!(object = %presigned.object, bytes = length, "Upload succeeded.");
        Ok(())
    }
}
