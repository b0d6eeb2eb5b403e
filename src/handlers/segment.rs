//! Operator endpoints for the open segment.
//!
//! - `GET /api/v1/segment`: the metadata record, 404 when no segment is open
//! - `DELETE /api/v1/segment`: drop the record so the next chunk opens a new
//!   segment. This is the way out of a corrupt record or a segment blob that
//!   went missing; the segment blobs themselves are left alone.

use crate::{audio::PcmFormat, error::{AppError, AppResult}, state::AppState};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

pub async fn get_segment(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let engine = state.engine()?;
    let metadata = engine
        .current()
        .await?
        .ok_or_else(|| AppError::NotFound("No segment is open".to_string()))?;

    let rate = metadata
        .sample_rate
        .unwrap_or(state.config.segment.default_sample_rate);
    let format = PcmFormat::mono16(rate);
    let byte_rate = f64::from(format.byte_rate());
    let rotates_on_next_chunk = engine
        .policy()
        .should_rotate(Some(&metadata), Utc::now(), format);

    Ok(HttpResponse::Ok().json(json!({
        "filename": metadata.filename,
        "last_write_time": metadata.last_write_time.to_rfc3339(),
        "current_size": metadata.current_size,
        "sample_rate": metadata.sample_rate,
        "duration_seconds": metadata.current_size as f64 / byte_rate,
        "rotates_on_next_chunk": rotates_on_next_chunk,
    })))
}

pub async fn close_segment(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let engine = state.engine()?;
    let closed = engine.close_current().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "closed",
        "closed_segment": closed.map(|m| m.filename),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
