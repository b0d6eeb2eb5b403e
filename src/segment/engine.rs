//! # Append Engine
//!
//! Turns one incoming PCM chunk into a storage update:
//!
//! 1. Load the metadata record
//! 2. Ask the rotation policy whether the open segment can take the chunk
//! 3. Either write a brand new segment (`header ++ chunk`) or rewrite the open
//!    one as `new header ++ old payload ++ chunk`
//! 4. Save the updated metadata record
//!
//! ## Whole-object rewrite:
//! Blob backends replace objects whole, so an append reads the entire segment,
//! rebuilds it in memory with a corrected header and uploads it again. Cost
//! grows with segment size; the rotation duration cap keeps that bounded
//! (five minutes of 16 kHz mono is 9.6 MB).
//!
//! ## Consistency:
//! Metadata is only saved after the blob write succeeded, so a failed chunk
//! never advances `current_size`. The blob write itself is not rolled back if
//! the metadata save fails afterwards; the record then describes the segment
//! as it was before the chunk, and the next append overwrites the extra bytes.
//!
//! ## Serialisation:
//! The metadata record and the segment blob are two independent objects with
//! no transaction between them. Every `ingest` therefore holds the engine's
//! mutex for the whole load → decide → write → save sequence, so chunks handled
//! by this process never interleave. Several processes pointed at the same
//! metadata key are still not coordinated with each other.

use super::metadata::{MetadataError, MetadataStore, SegmentMetadata};
use super::rotation::{RotationDecision, RotationPolicy};
use crate::audio::{
    encode_header, parse_header, PcmFormat, HEADER_LEN, MAX_PAYLOAD_LEN, MAX_SAMPLE_RATE,
};
use crate::storage::{BlobStore, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const SEGMENT_CONTENT_TYPE: &str = "audio/wav";

/// Failure of a single `ingest` call.
///
/// Every variant is terminal for the chunk: nothing is retried or buffered.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A setting the blob store needs is not configured.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The blob store could not be reached or rejected our credentials.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The metadata record exists but cannot be decoded, or it disagrees with
    /// the segment it names. Needs an operator.
    #[error("segment metadata corrupt: {0}")]
    MetadataCorrupt(String),

    /// The metadata names a segment that is not in the store.
    #[error("active segment '{0}' is missing from storage")]
    BlobMissing(String),

    /// The chunk cannot be stored as given.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => IngestError::BackendUnavailable(msg),
            other => IngestError::Storage(other),
        }
    }
}

impl From<MetadataError> for IngestError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Corrupt { .. } => IngestError::MetadataCorrupt(err.to_string()),
            MetadataError::Encode(e) => IngestError::Storage(StorageError::Backend(e.to_string())),
            MetadataError::Storage(e) => e.into(),
        }
    }
}

/// Result of a successful `ingest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Segment that now holds the chunk.
    pub filename: String,
    /// Payload bytes in that segment after the chunk.
    pub current_size: u64,
    /// Whether the chunk opened a new segment.
    pub rotated: bool,
    pub decision: RotationDecision,
}

pub struct AppendEngine {
    blobs: Arc<dyn BlobStore>,
    metadata: MetadataStore,
    policy: RotationPolicy,
    lock: Mutex<()>,
}

impl AppendEngine {
    pub fn new(blobs: Arc<dyn BlobStore>, metadata_key: &str, policy: RotationPolicy) -> Self {
        Self {
            metadata: MetadataStore::new(blobs.clone(), metadata_key),
            blobs,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.blobs.backend_name()
    }

    /// Store one chunk of mono 16-bit PCM recorded at `sample_rate`.
    pub async fn ingest(
        &self,
        payload: &[u8],
        sample_rate: u32,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let format = PcmFormat::checked_mono16(sample_rate).ok_or_else(|| {
            IngestError::InputInvalid(format!(
                "sample rate {} is outside 1..={}",
                sample_rate, MAX_SAMPLE_RATE
            ))
        })?;

        let _guard = self.lock.lock().await;

        let current = self.metadata.load().await?;
        let decision = self.policy.decide(current.as_ref(), now, format);
        debug!(
            decision = decision.as_str(),
            active = current.as_ref().map(|m| m.filename.as_str()).unwrap_or("none"),
            "Rotation decision"
        );

        let updated = match current {
            Some(open) if !decision.rotates() => self.append(open, payload, format, now).await?,
            _ => self.start_segment(payload, format, now).await?,
        };

        self.metadata.save(&updated).await?;

        Ok(IngestOutcome {
            filename: updated.filename,
            current_size: updated.current_size,
            rotated: decision.rotates(),
            decision,
        })
    }

    /// The open segment's record, if any.
    pub async fn current(&self) -> Result<Option<SegmentMetadata>, IngestError> {
        Ok(self.metadata.load().await?)
    }

    /// Forget the open segment so the next chunk starts a new one.
    ///
    /// The segment blob stays where it is. Returns the record that was removed.
    pub async fn close_current(&self) -> Result<Option<SegmentMetadata>, IngestError> {
        let _guard = self.lock.lock().await;

        // A corrupt record is exactly what this is for, so it is cleared too.
        let previous = match self.metadata.load().await {
            Ok(previous) => previous,
            Err(MetadataError::Corrupt { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        self.metadata.clear().await?;

        if let Some(previous) = &previous {
            info!(
                filename = %previous.filename,
                size = previous.current_size,
                metadata_key = %self.metadata.key(),
                "Closed segment"
            );
        }
        Ok(previous)
    }

    async fn start_segment(
        &self,
        payload: &[u8],
        format: PcmFormat,
        now: DateTime<Utc>,
    ) -> Result<SegmentMetadata, IngestError> {
        let size = payload_len(payload.len() as u64)?;
        let filename = self.unused_filename(now).await?;

        let mut content = Vec::with_capacity(HEADER_LEN + payload.len());
        content.extend_from_slice(&encode_header(size, format));
        content.extend_from_slice(payload);

        info!(filename = %filename, bytes = payload.len(), sample_rate = format.sample_rate, "Creating new segment");
        self.blobs.put(&filename, content, SEGMENT_CONTENT_TYPE).await?;

        Ok(SegmentMetadata {
            filename,
            last_write_time: now,
            current_size: u64::from(size),
            sample_rate: Some(format.sample_rate),
        })
    }

    async fn append(
        &self,
        open: SegmentMetadata,
        payload: &[u8],
        format: PcmFormat,
        now: DateTime<Utc>,
    ) -> Result<SegmentMetadata, IngestError> {
        let existing = self
            .blobs
            .get(&open.filename)
            .await?
            .ok_or_else(|| IngestError::BlobMissing(open.filename.clone()))?;

        let header = parse_header(&existing).ok_or_else(|| {
            IngestError::MetadataCorrupt(format!(
                "segment '{}' does not start with a WAV header ({} bytes)",
                open.filename,
                existing.len()
            ))
        })?;
        if header.format != format {
            // Only possible for records that predate `sample_rate`.
            warn!(
                filename = %open.filename,
                header_rate = header.format.sample_rate,
                chunk_rate = format.sample_rate,
                "Segment header format differs from chunk, rewriting with chunk format"
            );
        }
        debug!(filename = %open.filename, declared = header.data_len, "Read segment for append");

        let stored = (existing.len() - HEADER_LEN) as u64;
        if stored < open.current_size {
            return Err(IngestError::MetadataCorrupt(format!(
                "segment '{}' holds {} payload bytes but metadata records {}",
                open.filename, stored, open.current_size
            )));
        }
        if stored > open.current_size {
            // Left by a chunk whose blob write landed but whose metadata save
            // did not; that chunk was reported as failed, so its bytes go.
            warn!(
                filename = %open.filename,
                recorded = open.current_size,
                stored,
                "Dropping unacknowledged bytes at end of segment"
            );
        }

        let new_size = payload_len(open.current_size + payload.len() as u64)?;
        let kept = &existing[HEADER_LEN..HEADER_LEN + open.current_size as usize];

        let mut content = Vec::with_capacity(HEADER_LEN + new_size as usize);
        content.extend_from_slice(&encode_header(new_size, format));
        content.extend_from_slice(kept);
        content.extend_from_slice(payload);

        info!(filename = %open.filename, bytes = payload.len(), total = new_size, "Appending to segment");
        self.blobs.put(&open.filename, content, SEGMENT_CONTENT_TYPE).await?;

        Ok(SegmentMetadata {
            filename: open.filename,
            last_write_time: now,
            current_size: u64::from(new_size),
            sample_rate: Some(format.sample_rate),
        })
    }

    /// `DD_MM_YYYY_HH_MM_SS.wav`, with `_1`, `_2`, ... added when that name is taken.
    async fn unused_filename(&self, now: DateTime<Utc>) -> Result<String, IngestError> {
        let stem = segment_stem(now);
        let mut candidate = format!("{}.wav", stem);
        let mut suffix = 0u32;

        while self.blobs.exists(&candidate).await? {
            suffix += 1;
            candidate = format!("{}_{}.wav", stem, suffix);
        }
        Ok(candidate)
    }
}

/// Timestamp part of a segment name, at one-second resolution.
pub fn segment_stem(now: DateTime<Utc>) -> String {
    now.format("%d_%m_%Y_%H_%M_%S").to_string()
}

fn payload_len(len: u64) -> Result<u32, IngestError> {
    u32::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| {
            IngestError::InputInvalid(format!(
                "segment payload of {} bytes exceeds the WAV limit of {} bytes",
                len, MAX_PAYLOAD_LEN
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlobStore, StorageResult};
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    const META_KEY: &str = "current_wav_metadata.json";

    fn engine() -> (MemoryBlobStore, AppendEngine) {
        let blobs = MemoryBlobStore::new();
        let policy = RotationPolicy::new(Duration::from_secs(300), Duration::from_secs(120));
        let engine = AppendEngine::new(Arc::new(blobs.clone()), META_KEY, policy);
        (blobs, engine)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 5).unwrap()
    }

    fn pcm(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    async fn blob(blobs: &MemoryBlobStore, key: &str) -> Vec<u8> {
        blobs.get(key).await.unwrap().expect("blob exists")
    }

    #[test]
    fn test_segment_name_format() {
        assert_eq!(segment_stem(t0()), "16_10_2026_09_30_05");
        let early = Utc.with_ymd_and_hms(2027, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(segment_stem(early), "02_01_2027_03_04_05");
    }

    #[tokio::test]
    async fn test_first_chunk_creates_segment() {
        let (blobs, engine) = engine();

        let outcome = engine.ingest(&pcm(320_000, 1), 16000, t0()).await.unwrap();

        assert_eq!(outcome.filename, "16_10_2026_09_30_05.wav");
        assert!(outcome.rotated);
        assert_eq!(outcome.decision, RotationDecision::NoSegment);

        let stored = blob(&blobs, &outcome.filename).await;
        assert_eq!(stored.len(), 320_044);
        assert_eq!(parse_header(&stored).unwrap().data_len, 320_000);
        assert_eq!(blobs.content_type(&outcome.filename).as_deref(), Some("audio/wav"));

        let metadata = engine.current().await.unwrap().unwrap();
        assert_eq!(metadata.current_size, 320_000);
        assert_eq!(metadata.last_write_time, t0());
        assert_eq!(metadata.sample_rate, Some(16000));
    }

    #[tokio::test]
    async fn test_immediate_chunk_appends() {
        let (blobs, engine) = engine();
        let first = engine.ingest(&pcm(320_000, 1), 16000, t0()).await.unwrap();

        let second = engine.ingest(&pcm(160_000, 2), 16000, t0()).await.unwrap();

        assert_eq!(second.filename, first.filename);
        assert!(!second.rotated);
        assert_eq!(second.current_size, 480_000);

        let stored = blob(&blobs, &first.filename).await;
        assert_eq!(stored.len(), 44 + 480_000);
        assert_eq!(parse_header(&stored).unwrap().data_len, 480_000);
        assert!(stored[44..44 + 320_000].iter().all(|b| *b == 1));
        assert!(stored[44 + 320_000..].iter().all(|b| *b == 2));

        let metadata = engine.current().await.unwrap().unwrap();
        assert_eq!(metadata.current_size, 480_000);
        assert_eq!(metadata.filename, first.filename);
    }

    #[tokio::test]
    async fn test_appends_keep_blob_and_metadata_in_step() {
        let (blobs, engine) = engine();
        let chunks = [3200usize, 1, 6400, 0, 17, 32000];
        let mut now = t0();
        let mut filename = String::new();

        for chunk in chunks {
            let outcome = engine.ingest(&pcm(chunk, 7), 16000, now).await.unwrap();
            filename = outcome.filename;
            now += TimeDelta::seconds(1);
        }

        let total: usize = chunks.iter().sum();
        let stored = blob(&blobs, &filename).await;
        assert_eq!(stored.len(), HEADER_LEN + total);
        assert_eq!(parse_header(&stored).unwrap().data_len as usize, total);
        assert_eq!(engine.current().await.unwrap().unwrap().current_size as usize, total);
    }

    #[tokio::test]
    async fn test_appended_segment_decodes_as_wav() {
        let (blobs, engine) = engine();
        let samples: Vec<i16> = (0..3200).map(|i| ((i % 200) * 100 - 10000) as i16).collect();
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let outcome = engine.ingest(&bytes[..3200], 16000, t0()).await.unwrap();
        engine.ingest(&bytes[3200..], 16000, t0()).await.unwrap();

        let stored = blob(&blobs, &outcome.filename).await;
        let (header, data) = wav::read(&mut std::io::Cursor::new(stored)).unwrap();
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(data.as_sixteen().map(|d| d.to_vec()), Some(samples));
    }

    #[tokio::test]
    async fn test_inactivity_rotates_under_duration_cap() {
        let (blobs, engine) = engine();
        let earlier = t0() - TimeDelta::minutes(3);
        let stale = SegmentMetadata {
            filename: "old.wav".to_string(),
            last_write_time: earlier,
            current_size: 4 * 60 * 32_000,
            sample_rate: Some(16000),
        };
        MetadataStore::new(Arc::new(blobs.clone()), META_KEY)
            .save(&stale)
            .await
            .unwrap();

        let outcome = engine.ingest(&pcm(100, 0), 16000, t0()).await.unwrap();

        assert!(outcome.rotated);
        assert_eq!(outcome.decision, RotationDecision::Inactivity);
        assert_ne!(outcome.filename, "old.wav");
        assert_eq!(outcome.current_size, 100);
    }

    #[tokio::test]
    async fn test_duration_cap_rotates() {
        let (_, engine) = engine();
        let mut now = t0();
        let first = engine.ingest(&pcm(300 * 32_000 - 2, 0), 16000, now).await.unwrap();

        now += TimeDelta::seconds(1);
        let second = engine.ingest(&pcm(2, 0), 16000, now).await.unwrap();
        assert_eq!(second.filename, first.filename);
        assert_eq!(second.current_size, 300 * 32_000);

        now += TimeDelta::seconds(1);
        let third = engine.ingest(&pcm(2, 0), 16000, now).await.unwrap();
        assert_eq!(third.decision, RotationDecision::DurationCap);
        assert_ne!(third.filename, first.filename);
    }

    #[tokio::test]
    async fn test_rotation_leaves_old_segment_untouched() {
        let (blobs, engine) = engine();
        let first = engine.ingest(&pcm(64, 1), 16000, t0()).await.unwrap();
        let before = blob(&blobs, &first.filename).await;

        let later = t0() + TimeDelta::minutes(10);
        let second = engine.ingest(&pcm(32, 2), 16000, later).await.unwrap();

        assert_ne!(second.filename, first.filename);
        assert_eq!(blob(&blobs, &first.filename).await, before);
    }

    #[tokio::test]
    async fn test_same_second_rotation_gets_suffix() {
        let (blobs, engine) = engine();
        let first = engine.ingest(&pcm(10, 1), 16000, t0()).await.unwrap();

        // Different rate forces a rotation within the same second.
        let second = engine.ingest(&pcm(10, 2), 8000, t0()).await.unwrap();
        let third = engine.ingest(&pcm(10, 3), 16000, t0()).await.unwrap();

        assert_eq!(first.filename, "16_10_2026_09_30_05.wav");
        assert_eq!(second.filename, "16_10_2026_09_30_05_1.wav");
        assert_eq!(third.filename, "16_10_2026_09_30_05_2.wav");
        assert_eq!(second.decision, RotationDecision::FormatChange);

        let header = parse_header(&blob(&blobs, &second.filename).await).unwrap();
        assert_eq!(header.format.sample_rate, 8000);
    }

    #[tokio::test]
    async fn test_missing_blob_is_hard_failure() {
        let (blobs, engine) = engine();
        let outcome = engine.ingest(&pcm(10, 1), 16000, t0()).await.unwrap();
        blobs.delete(&outcome.filename).await.unwrap();
        let writes = blobs.write_count();

        let err = engine.ingest(&pcm(10, 1), 16000, t0()).await.unwrap_err();

        assert!(matches!(err, IngestError::BlobMissing(ref name) if *name == outcome.filename));
        assert_eq!(blobs.write_count(), writes);
        assert!(!blobs.exists(&outcome.filename).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_fails_closed() {
        let (blobs, engine) = engine();
        blobs.put(META_KEY, b"garbage".to_vec(), "application/json").await.unwrap();

        let err = engine.ingest(&pcm(10, 1), 16000, t0()).await.unwrap_err();
        assert!(matches!(err, IngestError::MetadataCorrupt(_)));
        assert_eq!(blobs.keys(), vec![META_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_truncated_segment_is_corrupt() {
        let (blobs, engine) = engine();
        let outcome = engine.ingest(&pcm(100, 1), 16000, t0()).await.unwrap();
        let mut stored = blob(&blobs, &outcome.filename).await;
        stored.truncate(80);
        blobs.put(&outcome.filename, stored, "audio/wav").await.unwrap();

        let err = engine.ingest(&pcm(10, 1), 16000, t0()).await.unwrap_err();
        assert!(matches!(err, IngestError::MetadataCorrupt(_)));
    }

    #[tokio::test]
    async fn test_unsaved_tail_is_overwritten() {
        let (blobs, engine) = engine();
        let outcome = engine.ingest(&pcm(100, 1), 16000, t0()).await.unwrap();

        // A previous chunk reached the blob but its metadata save never happened.
        let mut stored = blob(&blobs, &outcome.filename).await;
        stored.extend_from_slice(&pcm(50, 9));
        blobs.put(&outcome.filename, stored, "audio/wav").await.unwrap();

        let next = engine.ingest(&pcm(20, 2), 16000, t0()).await.unwrap();
        assert_eq!(next.current_size, 120);

        let stored = blob(&blobs, &outcome.filename).await;
        assert_eq!(stored.len(), HEADER_LEN + 120);
        assert!(!stored[HEADER_LEN..].contains(&9));
    }

    #[tokio::test]
    async fn test_out_of_range_sample_rate_rejected() {
        let (blobs, engine) = engine();
        for rate in [0, MAX_SAMPLE_RATE + 1, 300_000_000, u32::MAX] {
            let err = engine.ingest(&pcm(64, 1), rate, t0()).await.unwrap_err();
            assert!(matches!(err, IngestError::InputInvalid(_)), "rate {}", rate);
        }
        assert_eq!(blobs.write_count(), 0);
    }

    #[tokio::test]
    async fn test_close_current_forces_rotation() {
        let (blobs, engine) = engine();
        let first = engine.ingest(&pcm(10, 1), 16000, t0()).await.unwrap();

        let closed = engine.close_current().await.unwrap().unwrap();
        assert_eq!(closed.filename, first.filename);
        assert_eq!(engine.current().await.unwrap(), None);
        assert!(blobs.exists(&first.filename).await.unwrap());

        let next = engine
            .ingest(&pcm(10, 1), 16000, t0() + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert!(next.rotated);
        assert_ne!(next.filename, first.filename);
    }

    #[tokio::test]
    async fn test_close_current_clears_corrupt_record() {
        let (blobs, engine) = engine();
        blobs.put(META_KEY, b"{".to_vec(), "application/json").await.unwrap();

        assert_eq!(engine.close_current().await.unwrap(), None);
        assert!(!blobs.exists(META_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_chunks_are_not_lost() {
        let (blobs, engine) = engine();
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.ingest(&pcm(1000, i), 16000, t0()).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metadata = engine.current().await.unwrap().unwrap();
        assert_eq!(metadata.current_size, 16_000);
        assert_eq!(blob(&blobs, &metadata.filename).await.len(), HEADER_LEN + 16_000);
    }

    /// Backend whose reads fail, to check that nothing gets written afterwards.
    struct UnreachableStore {
        inner: MemoryBlobStore,
    }

    #[async_trait]
    impl BlobStore for UnreachableStore {
        async fn get(&self, _key: &str) -> StorageResult<Option<Vec<u8>>> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
            self.inner.put(key, data, content_type).await
        }

        async fn exists(&self, key: &str) -> StorageResult<bool> {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }

        fn backend_name(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_metadata_read_failure_writes_nothing() {
        let inner = MemoryBlobStore::new();
        let store = UnreachableStore {
            inner: inner.clone(),
        };
        let policy = RotationPolicy::new(Duration::from_secs(300), Duration::from_secs(120));
        let engine = AppendEngine::new(Arc::new(store), META_KEY, policy);

        let err = engine.ingest(&pcm(320_000, 1), 16000, t0()).await.unwrap_err();

        assert!(matches!(err, IngestError::BackendUnavailable(_)));
        assert_eq!(inner.write_count(), 0);
    }
}
