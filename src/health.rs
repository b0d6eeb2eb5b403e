use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness plus a summary of what the recorder has stored.
///
/// Reports `degraded` when the blob store is not configured: the process is
/// up, but every chunk would be refused with a 500.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let backend = state.storage_backend();

    HttpResponse::Ok().json(json!({
        "status": if backend.is_some() { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "segment-recorder",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "storage": {
            "backend": backend.unwrap_or(config.storage.backend.as_str()),
            "configured": backend.is_some(),
            "bucket": config.storage.bucket,
            "metadata_key": config.storage.metadata_key
        },
        "segments": {
            "max_duration_secs": config.segment.max_duration_secs,
            "inactivity_limit_secs": config.segment.inactivity_limit_secs,
            "last_segment": metrics.ingest.last_segment
        },
        "ingest": {
            "chunks_stored": metrics.ingest.chunks_stored,
            "bytes_stored": metrics.ingest.bytes_stored,
            "segments_opened": metrics.ingest.segments_opened,
            "chunks_failed": metrics.ingest.chunks_failed
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "ingest": {
            "chunks_stored": metrics.ingest.chunks_stored,
            "bytes_stored": metrics.ingest.bytes_stored,
            "segments_opened": metrics.ingest.segments_opened,
            "chunks_failed": metrics.ingest.chunks_failed,
            "average_chunk_bytes": if metrics.ingest.chunks_stored > 0 {
                metrics.ingest.bytes_stored as f64 / metrics.ingest.chunks_stored as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats
    }))
}
