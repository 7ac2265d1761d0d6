// Type definitions and error enums

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

/// HTTP method a presigned URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    Put,
    Get,
}

impl std::fmt::Display for PresignMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresignMethod::Put => write!(f, "PUT"),
            PresignMethod::Get => write!(f, "GET"),
        }
    }
}

impl std::str::FromStr for PresignMethod {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUT" => Ok(PresignMethod::Put),
            "GET" => Ok(PresignMethod::Get),
            other => Err(StorageError::InvalidInput(format!(
                "unsupported presign method: {}",
                other
            ))),
        }
    }
}

impl From<PresignMethod> for reqwest::Method {
    fn from(method: PresignMethod) -> Self {
        match method {
            PresignMethod::Put => reqwest::Method::PUT,
            PresignMethod::Get => reqwest::Method::GET,
        }
    }
}

/// Errors produced by the storage adapter, the transfer manager and the
/// presigned upload path.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Transfer failed{}: {message}", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    TransferFailed {
        status: Option<u16>,
        message: String,
    },

    #[error("Local file error for {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn local_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::LocalFile {
            path: path.into(),
            source,
        }
    }

    /// Status code the backend answered with, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::TransferFailed { status, .. } => *status,
            StorageError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::LocalFile { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                StatusCode::BAD_REQUEST
            }
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Rejected request");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::InvalidRequest(format!("Malformed multipart body: {}", err.body_text()))
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presign_method_parse() {
        assert_eq!("put".parse::<PresignMethod>().unwrap(), PresignMethod::Put);
        assert_eq!("GET".parse::<PresignMethod>().unwrap(), PresignMethod::Get);
        assert!(matches!(
            "DELETE".parse::<PresignMethod>(),
            Err(StorageError::InvalidInput(_))
        ));
        assert_eq!(PresignMethod::Put.to_string(), "PUT");
    }

    #[test]
    fn test_error_status_mapping() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(
            AppError::from(StorageError::local_file("/tmp/x", missing)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StorageError::NotFound("b/k".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(StorageError::SigningFailed("bad".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::InvalidRequest("no file".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_transfer_failed_message() {
        let err = StorageError::TransferFailed {
            status: Some(403),
            message: "AccessDenied".into(),
        };
        assert_eq!(err.to_string(), "Transfer failed with status 403: AccessDenied");
        assert_eq!(err.status(), Some(403));
    }
}
