//! Storage layer (S3-compatible)
//!
//! [`Storage`] is the adapter the HTTP layer talks to. It owns a shared
//! [`ObjectBackend`] built once at startup and bounds every backend call with
//! the configured request timeout.

pub mod memory;
pub mod s3_client;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::config::{S3Config, StorageProvider};
use crate::presign::PresignedUrl;
use crate::types::{ConfigError, PresignMethod, StorageError, StorageResult};

pub use memory::MemoryBackend;
pub use s3_client::S3Backend;

pub const URI_SCHEME: &str = "s3";

/// Longest validity S3 accepts for a SigV4 presigned URL.
pub const MAX_PRESIGN_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A bucket/key pair naming one object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> StorageResult<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.trim().is_empty() {
            return Err(StorageError::InvalidInput("bucket name must not be empty".to_string()));
        }
        if key.trim().is_empty() {
            return Err(StorageError::InvalidInput("object key must not be empty".to_string()));
        }
        Ok(Self { bucket, key })
    }

    /// `s3://bucket/key`
    pub fn uri(&self) -> String {
        format!("{}://{}/{}", URI_SCHEME, self.bucket, self.key)
    }

    /// Inverse of [`ObjectRef::uri`]. Everything after the bucket is the key.
    pub fn parse_uri(uri: &str) -> StorageResult<Self> {
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| StorageError::InvalidInput(format!("not an s3:// URI: {}", uri)))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidInput(format!("URI has no object key: {}", uri)))?;
        Self::new(bucket, key)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_continuation_token: Option<String>,
}

/// Primitive operations of an object store.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Signature version reported by the diagnostic endpoint.
    fn signature_version(&self) -> &'static str;

    fn region(&self) -> String;

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<ListPage>;

    async fn put_object(&self, object: &ObjectRef, data: &[u8], content_type: &str) -> StorageResult<()>;

    /// Managed upload from a stream; the backend decides how to chunk it.
    async fn put_stream(
        &self,
        object: &ObjectRef,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<()>;

    async fn get_object(&self, object: &ObjectRef) -> StorageResult<Bytes>;

    async fn get_to_writer(
        &self,
        object: &ObjectRef,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<()>;

    /// Deleting a missing key is not an error.
    async fn delete_object(&self, object: &ObjectRef) -> StorageResult<()>;

    /// Delete a batch of keys from one bucket, returning how many were removed.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<usize>;

    async fn presign(&self, object: &ObjectRef, method: PresignMethod, expiry_secs: u32) -> StorageResult<String>;
}

/// Build the backend selected by `s3.provider`.
pub fn build_backend(config: &S3Config) -> Result<Arc<dyn ObjectBackend>, ConfigError> {
    match config.provider {
        StorageProvider::S3 => Ok(Arc::new(S3Backend::new(config)?)),
        StorageProvider::Memory => Ok(Arc::new(MemoryBackend::with_page_size(config.memory_page_size))),
    }
}

/// Await `fut`, turning an elapsed `limit` into [`StorageError::BackendUnavailable`].
pub(crate) async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::BackendUnavailable(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}

#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn ObjectBackend>,
    request_timeout: Duration,
}

impl Storage {
    pub fn new(backend: Arc<dyn ObjectBackend>, request_timeout: Duration) -> Self {
        Self {
            backend,
            request_timeout,
        }
    }

    pub fn signature_version(&self) -> &'static str {
        self.backend.signature_version()
    }

    pub fn region(&self) -> String {
        self.backend.region()
    }

    /// Count every object under `prefix`, following continuation tokens to the last page.
    pub async fn count_objects(&self, bucket: &str, prefix: &str) -> StorageResult<u64> {
        require_bucket(bucket)?;
        let mut count = 0u64;
        let mut token = None;
        loop {
            let page = with_timeout(
                self.request_timeout,
                "list objects",
                self.backend.list_page(bucket, prefix, token),
            )
            .await?;
            count += page.keys.len() as u64;
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(bucket, prefix, count, "Counted objects");
        Ok(count)
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let object = ObjectRef::new(bucket, key)?;
        with_timeout(
            self.request_timeout,
            "delete object",
            self.backend.delete_object(&object),
        )
        .await?;
        info!(bucket, key, "File deleted successfully");
        Ok(())
    }

    pub async fn delete_object_by_uri(&self, uri: &str) -> StorageResult<()> {
        let object = ObjectRef::parse_uri(uri)?;
        self.delete_object(&object.bucket, &object.key).await
    }

    /// Delete every object under `prefix`, page by page, returning the number removed.
    pub async fn delete_objects_by_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<u64> {
        require_bucket(bucket)?;
        let mut deleted = 0u64;
        let mut token = None;
        loop {
            let page = with_timeout(
                self.request_timeout,
                "list objects",
                self.backend.list_page(bucket, prefix, token),
            )
            .await?;
            if !page.keys.is_empty() {
                let removed = with_timeout(
                    self.request_timeout,
                    "delete objects",
                    self.backend.delete_objects(bucket, &page.keys),
                )
                .await?;
                deleted += removed as u64;
            }
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        info!(bucket, prefix, deleted, "Deleted {} objects", deleted);
        Ok(deleted)
    }

    /// Upload an in-memory buffer and return its `s3://bucket/key` URI.
    pub async fn upload_bytes(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<String> {
        let object = ObjectRef::new(bucket, key)?;
        let content_type = mime_guess::from_path(key).first_or_octet_stream();
        with_timeout(
            self.request_timeout,
            "put object",
            self.backend.put_object(&object, data, content_type.essence_str()),
        )
        .await?;
        info!(bucket, key, size = data.len(), "File {} uploaded to S3 bucket {}", key, bucket);
        Ok(object.uri())
    }

    /// Sign a URL authorizing `method` on `bucket/key` until now + `valid_for`.
    pub async fn generate_presigned_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        valid_for: Duration,
    ) -> StorageResult<PresignedUrl> {
        let object = ObjectRef::new(bucket, key)?;
        if valid_for.as_secs() == 0 || valid_for > MAX_PRESIGN_VALIDITY {
            return Err(StorageError::InvalidInput(format!(
                "presigned URL validity must be between 1s and {}s, got {}s",
                MAX_PRESIGN_VALIDITY.as_secs(),
                valid_for.as_secs()
            )));
        }
        let validity = chrono::Duration::from_std(valid_for)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        let expires_at = Utc::now() + validity;

        let url = with_timeout(
            self.request_timeout,
            "presign",
            self.backend.presign(&object, method, valid_for.as_secs() as u32),
        )
        .await?;
        if url.is_empty() {
            return Err(StorageError::SigningFailed(format!(
                "backend returned an empty URL for {}",
                object
            )));
        }

        debug!(bucket, key, %method, %expires_at, "Generated presigned URL");
        Ok(PresignedUrl {
            url,
            method,
            object,
            expires_at,
        })
    }
}

fn require_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.trim().is_empty() {
        return Err(StorageError::InvalidInput("bucket name must not be empty".to_string()));
    }
    Ok(())
}
