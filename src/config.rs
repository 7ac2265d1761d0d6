use std::env;
use std::path::Path;
use std::time::Duration;

use config::{builder::DefaultState, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::storage::MAX_PRESIGN_VALIDITY;
use crate::types::ConfigError;

const DEFAULT_SETTINGS_FILE: &str = "settings";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub s3: S3Config,
    pub presign: PresignConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Memory,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProvider::S3 => "s3",
            StorageProvider::Memory => "memory",
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct S3Config {
    pub provider: StorageProvider,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub path_style: bool,
    pub request_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub memory_page_size: usize,
}

// Keeps the secret key out of logs.
impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("provider", &self.provider)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &self.aws_secret_access_key.as_ref().map(|_| "***"))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("transfer_timeout_secs", &self.transfer_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresignConfig {
    pub expiry_secs: u64,
    pub upload_chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: Option<String>,
}

/// Static credentials pulled out of a validated [`S3Config`].
#[derive(Clone)]
pub struct S3Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

impl S3Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn credentials(&self) -> Result<S3Credentials<'_>, ConfigError> {
        Ok(S3Credentials {
            access_key_id: required(&self.aws_access_key_id, "s3.aws_access_key_id")?,
            secret_access_key: required(&self.aws_secret_access_key, "s3.aws_secret_access_key")?,
            region: required(&self.region, "s3.region")?,
        })
    }
}

impl PresignConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

impl Config {
    /// Load configuration from defaults, `AWS_*` fallbacks, an optional
    /// settings file and `SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Self::defaults()?;
        for (var, key) in [
            ("AWS_ACCESS_KEY_ID", "s3.aws_access_key_id"),
            ("AWS_SECRET_ACCESS_KEY", "s3.aws_secret_access_key"),
            ("AWS_REGION", "s3.region"),
        ] {
            if let Ok(value) = env::var(var) {
                builder = builder.set_default(key, value)?;
            }
        }

        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };

        let builder = builder.add_source(file).add_source(
            Environment::default()
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_allowed_origins")
                .try_parsing(true),
        );

        Self::from_builder(builder)
    }

    /// Built-in defaults for every key except the S3 credentials.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.cors_allowed_origins", vec!["*"])?
            .set_default("server.max_upload_bytes", 100 * 1024 * 1024)?
            .set_default("s3.provider", "s3")?
            .set_default("s3.path_style", false)?
            .set_default("s3.request_timeout_secs", 30)?
            .set_default("s3.transfer_timeout_secs", 3600)?
            .set_default("s3.memory_page_size", 1000)?
            .set_default("presign.expiry_secs", 12 * 60 * 60)?
            .set_default("presign.upload_chunk_size", 64 * 1024)?
            .set_default("logging.filter", "s3_gateway=debug,tower_http=debug,axum=debug")?)
    }

    /// Build and validate from an assembled source stack.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on values that would otherwise surface as deep client errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.provider == StorageProvider::S3 {
            self.s3.credentials()?;
        }
        if self.s3.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "s3.request_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.s3.transfer_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "s3.transfer_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.s3.memory_page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "s3.memory_page_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.presign.upload_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "presign.upload_chunk_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.presign.expiry_secs == 0 || self.presign.expiry_secs > MAX_PRESIGN_VALIDITY.as_secs() {
            return Err(ConfigError::Invalid {
                key: "presign.expiry_secs",
                message: format!("must be between 1 and {}", MAX_PRESIGN_VALIDITY.as_secs()),
            });
        }
        Ok(())
    }
}
