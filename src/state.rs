//! # Application State Management
//!
//! Shared state handed to every request handler through `web::Data<AppState>`.
//!
//! ## What is shared:
//! - **config**: Read-only after startup, so a plain `Arc` is enough
//! - **engine**: The append engine, or the reason it could not be built
//! - **metrics**: Request and ingest counters behind `Arc<RwLock<_>>`
//! - **start_time**: For uptime reporting
//!
//! ## Arc<RwLock<T>> Pattern:
//! - **Arc**: Every actix worker holds a clone of the same state
//! - **RwLock**: Many handlers read metrics at once; updates take the write lock briefly
//!
//! The segment metadata itself is deliberately not cached here. The blob store
//! is the source of truth, and the engine reloads the record on every chunk.

use crate::config::AppConfig;
use crate::segment::{AppendEngine, IngestError, IngestOutcome, RotationPolicy};
use crate::storage::{self, BlobStore, StoreConfigError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// `Err` holds the configuration problem that every ingest reports.
    engine: Result<Arc<AppendEngine>, Arc<str>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Counters collected across all requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
    pub ingest: IngestMetrics,
}

/// What the append engine has done since startup.
///
/// - **chunks_stored**: chunks acknowledged with a 200
/// - **bytes_stored**: payload bytes in those chunks
/// - **segments_opened**: chunks that started a new segment
/// - **chunks_failed**: chunks answered with an error
#[derive(Debug, Default, Clone)]
pub struct IngestMetrics {
    pub chunks_stored: u64,
    pub bytes_stored: u64,
    pub segments_opened: u64,
    pub chunks_failed: u64,
    pub last_segment: Option<String>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build state and the blob backend named by the configuration.
    ///
    /// A missing required setting does not abort startup: it is logged once
    /// here and then reported by each ingest request as a 500.
    pub fn new(config: AppConfig) -> Result<Self, StoreConfigError> {
        let engine = match storage::from_config(&config.storage) {
            Ok(blobs) => Ok(Arc::new(Self::engine_for(&config, blobs))),
            Err(StoreConfigError::Missing(name)) => {
                warn!("{} is not set; audio ingestion will fail until it is configured", name);
                Err(Arc::from(format!("{} environment variable is not set", name)))
            }
            Err(StoreConfigError::Credentials(reason)) => {
                warn!("GCS credentials unusable ({}); audio ingestion will fail", reason);
                Err(Arc::from(format!("invalid GCS credentials: {}", reason)))
            }
            Err(e) => return Err(e),
        };

        Ok(Self::assemble(config, engine))
    }

    /// State over an already-built backend; used by tests and embedders.
    pub fn with_store(config: AppConfig, blobs: Arc<dyn BlobStore>) -> Self {
        let engine = Ok(Arc::new(Self::engine_for(&config, blobs)));
        Self::assemble(config, engine)
    }

    fn engine_for(config: &AppConfig, blobs: Arc<dyn BlobStore>) -> AppendEngine {
        let policy = RotationPolicy::new(
            config.segment.max_duration(),
            config.segment.inactivity_limit(),
        );
        AppendEngine::new(blobs, &config.storage.metadata_key, policy)
    }

    fn assemble(config: AppConfig, engine: Result<Arc<AppendEngine>, Arc<str>>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// The append engine, or `ConfigurationMissing` when storage is not configured.
    pub fn engine(&self) -> Result<Arc<AppendEngine>, IngestError> {
        self.engine
            .clone()
            .map_err(|msg| IngestError::ConfigurationMissing(msg.to_string()))
    }

    /// Backend name for health output, `None` when storage is not configured.
    pub fn storage_backend(&self) -> Option<&'static str> {
        self.engine.as_ref().ok().map(|e| e.backend_name())
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_ingest(&self, payload_len: usize, outcome: &IngestOutcome) {
        let mut metrics = self.write_metrics();
        metrics.ingest.chunks_stored += 1;
        metrics.ingest.bytes_stored += payload_len as u64;
        if outcome.rotated {
            metrics.ingest.segments_opened += 1;
        }
        metrics.ingest.last_segment = Some(outcome.filename.clone());
    }

    pub fn record_ingest_failure(&self) {
        self.write_metrics().ingest.chunks_failed += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
