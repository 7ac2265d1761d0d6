use std::sync::Arc;

use crate::config::Config;
use crate::presign::PresignedUploader;
use crate::storage::{ObjectBackend, Storage};
use crate::transfer::TransferManager;
use crate::types::StorageResult;

/// Shared state handed to every router. Built once by the composition root.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub transfers: TransferManager,
    pub uploader: PresignedUploader,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn ObjectBackend>) -> StorageResult<Self> {
        let storage = Storage::new(backend.clone(), config.s3.request_timeout());
        let transfers = TransferManager::new(backend, config.s3.transfer_timeout());
        let uploader = PresignedUploader::new(
            config.presign.upload_chunk_size,
            config.s3.transfer_timeout(),
        )?;
        Ok(Self {
            config: Arc::new(config),
            storage,
            transfers,
            uploader,
        })
    }
}

// API Request/Response types
// Query parameter names follow the camelCase names the endpoints were published with.

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketParams {
    pub bucket_name: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPathParams {
    pub bucket_name: Option<String>,
    pub object_name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUploadParams {
    pub bucket_name: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadParams {
    pub bucket_name: Option<String>,
    pub object_name: Option<String>,
    pub destination_path: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixParams {
    pub bucket_name: Option<String>,
    pub prefix: Option<String>,
    pub uri: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignParams {
    pub bucket_name: Option<String>,
    pub key: Option<String>,
    pub method: Option<String>,
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, serde::Serialize)]
pub struct CountResponse {
    pub bucket: String,
    pub prefix: String,
    pub count: u64,
}

#[derive(Debug, serde::Serialize)]
pub struct DeleteResponse {
    pub bucket: String,
    pub prefix: String,
    pub deleted: u64,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage: String,
    pub region: String,
}
