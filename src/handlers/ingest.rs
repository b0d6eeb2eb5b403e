//! Audio ingestion endpoint.
//!
//! `POST /?sample_rate=16000&uid=device-42` with a body of raw mono 16-bit
//! little-endian PCM. The chunk is appended to the open segment (or starts a
//! new one) and the answer names the segment that now holds it.

use crate::{
    audio::MAX_SAMPLE_RATE,
    error::{AppError, AppResult},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{error, info};

/// Query parameters of the ingestion endpoint.
///
/// Both are kept as raw strings: a bad `sample_rate` falls back to the default
/// instead of failing the request, and `uid` is only logged.
#[derive(Debug, Deserialize)]
pub struct IngestQuery {
    pub sample_rate: Option<String>,
    pub uid: Option<String>,
}

/// Effective sample rate: the parsed parameter if it is an integer in
/// `1..=MAX_SAMPLE_RATE`, otherwise `default`.
pub fn effective_sample_rate(param: Option<&str>, default: u32) -> u32 {
    param
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|rate| (1..=MAX_SAMPLE_RATE).contains(rate))
        .unwrap_or(default)
}

/// Read the whole request body, refusing anything above `limit` bytes.
async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            AppError::BadRequest(format!("Failed to read request body: {}", e))
        })?;
        if body.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Audio chunk exceeds the {} byte limit",
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

pub async fn ingest_audio(
    state: web::Data<AppState>,
    query: web::Query<IngestQuery>,
    payload: web::Payload,
) -> AppResult<HttpResponse> {
    let uid = query.uid.as_deref().unwrap_or("");
    let requested = query.sample_rate.as_deref();
    let sample_rate = effective_sample_rate(requested, state.config.segment.default_sample_rate);

    info!(
        uid = %uid,
        requested_sample_rate = requested.unwrap_or(""),
        sample_rate,
        "Received audio chunk"
    );

    let result = async {
        let engine = state.engine()?;
        let body = read_body(payload, state.config.segment.max_chunk_bytes).await?;
        let outcome = engine.ingest(&body, sample_rate, Utc::now()).await?;
        Ok::<_, AppError>((body.len(), outcome))
    }
    .await;

    match result {
        Ok((bytes, outcome)) => {
            state.record_ingest(bytes, &outcome);
            info!(
                uid = %uid,
                filename = %outcome.filename,
                bytes,
                segment_size = outcome.current_size,
                decision = outcome.decision.as_str(),
                "Stored audio chunk"
            );
            Ok(HttpResponse::Ok()
                .content_type("text/plain; charset=utf-8")
                .body(format!("Audio bytes processed for file {}", outcome.filename)))
        }
        Err(e) => {
            state.record_ingest_failure();
            error!(uid = %uid, error = %e, "Failed to store audio chunk");
            Err(e)
        }
    }
}
