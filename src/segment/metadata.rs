//! # Segment Metadata
//!
//! The single durable record describing the segment that is currently open.
//! It lives as a small JSON object next to the segments in the blob store:
//!
//! ```json
//! {
//!   "filename": "16_10_2026_09_30_00.wav",
//!   "last_write_time": "2026-10-16T09:31:12.482Z",
//!   "current_size": 480000,
//!   "sample_rate": 16000
//! }
//! ```
//!
//! `current_size` counts payload bytes only, so for a consistent pair of
//! record and blob it always equals the blob length minus the 44-byte header.
//! `sample_rate` is absent in records written before it was tracked.

use crate::storage::{BlobStore, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    /// Object key of the segment blob; fixed for the segment's lifetime.
    pub filename: String,

    /// Time of the most recent successful append.
    pub last_write_time: DateTime<Utc>,

    /// Payload bytes written so far, excluding the header.
    pub current_size: u64,

    /// Sample rate the segment's header declares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    /// The record exists but is not a valid metadata document.
    #[error("failed to decode metadata '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode metadata: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read-modify-write access to the metadata record.
///
/// There is no version check on `save`: the last writer wins. The append
/// engine serialises its own callers; separate processes sharing one bucket
/// are not coordinated.
#[derive(Clone)]
pub struct MetadataStore {
    blobs: Arc<dyn BlobStore>,
    key: String,
}

impl MetadataStore {
    pub fn new(blobs: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            blobs,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The current record, or `None` when no segment has been opened yet.
    pub async fn load(&self) -> Result<Option<SegmentMetadata>, MetadataError> {
        let Some(bytes) = self.blobs.get(&self.key).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| MetadataError::Corrupt {
                key: self.key.clone(),
                source,
            })
    }

    pub async fn save(&self, metadata: &SegmentMetadata) -> Result<(), MetadataError> {
        let body = serde_json::to_vec(metadata).map_err(MetadataError::Encode)?;
        self.blobs.put(&self.key, body, "application/json").await?;
        Ok(())
    }

    /// Drop the record so the next chunk opens a new segment.
    pub async fn clear(&self) -> Result<(), MetadataError> {
        self.blobs.delete(&self.key).await?;
        Ok(())
    }
}
