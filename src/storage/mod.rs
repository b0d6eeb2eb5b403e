//! # Blob Store
//!
//! The object-storage backend that holds both the segment WAV files and the
//! metadata record. Segments and metadata only ever go through the
//! [`BlobStore`] trait, so the engine does not know which backend it talks to.
//!
//! ## Backends:
//! - **gcs**: Google Cloud Storage JSON API over HTTPS (production)
//! - **filesystem**: A local directory, one file per object (development)
//! - **memory**: An in-process map (tests, throwaway runs)
//!
//! ## Object semantics:
//! Every backend replaces an object whole on `put`. None of them offers
//! byte-range append, which is why the engine rewrites a segment in full on
//! every chunk.

pub mod fs;
pub mod gcs;
pub mod memory;

pub use fs::FsBlobStore;
pub use gcs::{GcsAuth, GcsBlobStore};
pub use memory::MemoryBlobStore;

use crate::config::{StorageBackend, StorageConfig};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a blob backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused our credentials.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the operation failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Whole-object read/write access to a single bucket.
///
/// ## Rust Concepts:
/// - **#[async_trait]**: Lets a trait declare async methods and still be used as `dyn BlobStore`
/// - **Send + Sync**: The store is shared between all actix worker threads
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read an entire object. `Ok(None)` means the object does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Create or replace an object with `data` in a single write.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Whether an object exists, without downloading it.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Short backend name for logs and the health endpoint.
    fn backend_name(&self) -> &'static str;
}

/// Why a blob store could not be built from configuration.
#[derive(Debug, Error)]
pub enum StoreConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid GCS credentials: {0}")]
    Credentials(String),

    #[error("failed to initialise storage backend: {0}")]
    Init(String),
}

/// Build the configured backend.
///
/// Missing or unusable credentials are reported as [`StoreConfigError::Missing`]
/// or [`StoreConfigError::Credentials`] so the caller can keep serving and fail
/// each ingest request instead of refusing to start.
///
/// For gcs, a fixed `access_token` wins over `credentials_json`.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StoreConfigError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryBlobStore::new())),
        StorageBackend::Filesystem => {
            let store = FsBlobStore::new(&config.root)
                .map_err(|e| StoreConfigError::Init(format!("{}: {}", config.root.display(), e)))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Gcs => {
            let bucket = config
                .bucket
                .as_deref()
                .filter(|b| !b.is_empty())
                .ok_or(StoreConfigError::Missing("GCS_BUCKET_NAME"))?;
            let auth = gcs_auth(config)?;

            let store = GcsBlobStore::new(&config.endpoint, bucket, auth)
                .map_err(|e| StoreConfigError::Init(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}

fn gcs_auth(config: &StorageConfig) -> Result<GcsAuth, StoreConfigError> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    if let Some(token) = non_empty(&config.access_token) {
        return Ok(GcsAuth::Static(token));
    }
    let encoded = non_empty(&config.credentials_json)
        .ok_or(StoreConfigError::Missing("GOOGLE_APPLICATION_CREDENTIALS_JSON"))?;
    GcsAuth::from_service_account_base64(&encoded).map_err(StoreConfigError::Credentials)
}
