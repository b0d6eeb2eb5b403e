//! # Configuration Management
//!
//! This module loads the recorder's configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - A few well-known deployment variables (HOST, PORT, GCS_BUCKET_NAME,
//!   GOOGLE_APPLICATION_CREDENTIALS_JSON, GCS_ACCESS_TOKEN)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known deployment variables
//! 2. Environment variables (APP_SERVER__PORT, APP_SEGMENT__MAX_DURATION_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::{MAX_PAYLOAD_LEN, MAX_SAMPLE_RATE};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: Automatically implements common traits:
///   - `Debug`: Allows printing with {:?} for debugging
///   - `Clone`: Each actix worker gets its own copy through AppState
///   - `Serialize`/`Deserialize`: Lets the `config` crate merge layers into this struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub segment: SegmentConfig,
}

/// Where the HTTP listener binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Which blob backend holds the segments, and how to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs,
    Filesystem,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Gcs => "gcs",
            StorageBackend::Filesystem => "filesystem",
            StorageBackend::Memory => "memory",
        }
    }
}

/// Blob store settings.
///
/// ## Fields:
/// - `bucket`: GCS bucket holding segments and the metadata record
/// - `credentials_json`: Base64 service-account key file; tokens are minted and refreshed from it
/// - `access_token`: Fixed OAuth bearer token, used instead of `credentials_json` when set
/// - `endpoint`: GCS API base URL, point it at an emulator for local testing
/// - `root`: Directory used by the filesystem backend
/// - `metadata_key`: Object key of the single metadata record
///
/// Neither credential is ever logged or returned by the config endpoint.
///
/// `bucket` and the credentials are optional here: a gcs deployment without
/// them still starts, and each ingest request reports the missing setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: Option<String>,
    pub credentials_json: Option<String>,
    pub access_token: Option<String>,
    pub endpoint: String,
    pub root: PathBuf,
    pub metadata_key: String,
}

/// Segment rotation and chunk limits.
///
/// ## Fields:
/// - `max_duration_secs`: A segment holding this much audio is closed on the next chunk
/// - `inactivity_limit_secs`: A segment idle for this long is closed on the next chunk
/// - `default_sample_rate`: Used when the request has no usable `sample_rate`
/// - `max_chunk_bytes`: Largest request body accepted for one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub max_duration_secs: u64,
    pub inactivity_limit_secs: u64,
    pub default_sample_rate: u32,
    pub max_chunk_bytes: usize,
}

impl SegmentConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn inactivity_limit(&self) -> Duration {
        Duration::from_secs(self.inactivity_limit_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                bucket: None,
                credentials_json: None,
                access_token: None,
                endpoint: "https://storage.googleapis.com".to_string(),
                root: PathBuf::from("./segments"),
                metadata_key: "current_wav_metadata.json".to_string(),
            },
            segment: SegmentConfig {
                max_duration_secs: 5 * 60,      // 5 minutes per segment
                inactivity_limit_secs: 2 * 60,  // 2 minutes of silence closes a segment
                default_sample_rate: 16000,
                max_chunk_bytes: 16 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_STORAGE__BACKEND=gcs`: Select the GCS backend
    /// - `APP_SEGMENT__MAX_DURATION_SECS=600`: Ten minute segments
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `GCS_BUCKET_NAME=my-audio`: Bucket for the gcs backend
    /// - `GOOGLE_APPLICATION_CREDENTIALS_JSON=<base64>`: Service-account key for the gcs backend
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(bucket) = env::var("GCS_BUCKET_NAME") {
            settings = settings.set_override("storage.bucket", bucket)?;
        }
        if let Ok(credentials) = env::var("GOOGLE_APPLICATION_CREDENTIALS_JSON") {
            settings = settings.set_override("storage.credentials_json", credentials)?;
        }
        if let Ok(token) = env::var("GCS_ACCESS_TOKEN") {
            settings = settings.set_override("storage.access_token", token)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Missing GCS settings are not checked here; see [`StorageConfig`].
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.segment.max_duration_secs == 0 {
            return Err(anyhow::anyhow!("Segment max duration must be greater than 0"));
        }

        if self.segment.inactivity_limit_secs == 0 {
            return Err(anyhow::anyhow!("Segment inactivity limit must be greater than 0"));
        }

        if !(1..=MAX_SAMPLE_RATE).contains(&self.segment.default_sample_rate) {
            return Err(anyhow::anyhow!(
                "Default sample rate must be between 1 and {}",
                MAX_SAMPLE_RATE
            ));
        }

        if self.segment.max_chunk_bytes == 0 || self.segment.max_chunk_bytes as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(anyhow::anyhow!(
                "Max chunk size must be between 1 and {} bytes",
                MAX_PAYLOAD_LEN
            ));
        }

        if self.storage.metadata_key.is_empty() {
            return Err(anyhow::anyhow!("Metadata key cannot be empty"));
        }

        Ok(())
    }

    /// Configuration as JSON with secrets replaced, for the config endpoint.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        for secret in ["/storage/access_token", "/storage/credentials_json"] {
            if let Some(field) = value.pointer_mut(secret) {
                if !field.is_null() {
                    *field = serde_json::Value::String("***".to_string());
                }
            }
        }
        value
    }
}
