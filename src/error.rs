//! # Error Handling
//!
//! HTTP-facing error type. Domain failures from the segment engine and the
//! blob store are converted into an [`AppError`], which decides the status
//! code and the response body.
//!
//! ## Response format:
//! Clients of the ingestion endpoint are simple recorders that only look at the
//! status line and log the body, so errors are answered as short plain text:
//! ```text
//! HTTP/1.1 500 Internal Server Error
//! content-type: text/plain; charset=utf-8
//!
//! segment metadata corrupt: failed to decode metadata 'current_wav_metadata.json': ...
//! ```

use crate::segment::IngestError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::fmt;

/// Error categories and the status code each one maps to.
///
/// - **Internal** → 500: storage failures, corrupt state
/// - **ConfigError** → 500: required settings absent
/// - **BadRequest** → 400: unreadable or unusable request body
/// - **PayloadTooLarge** → 413: chunk above the configured limit
/// - **NotFound** → 404: nothing to show on the operator endpoints
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    ConfigError(String),
    BadRequest(String),
    PayloadTooLarge(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "{}", msg),
            AppError::ConfigError(msg) => write!(f, "{}", msg),
            AppError::BadRequest(msg) => write!(f, "{}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "{}", msg),
            AppError::NotFound(msg) => write!(f, "{}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

/// Map engine failures onto HTTP categories.
///
/// Only an unusable chunk is the client's fault; every storage or state
/// problem is a 500 so the recorder keeps the chunk and the operator looks.
impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::ConfigurationMissing(_) => AppError::ConfigError(err.to_string()),
            IngestError::InputInvalid(_) => AppError::BadRequest(err.to_string()),
            IngestError::BackendUnavailable(_)
            | IngestError::MetadataCorrupt(_)
            | IngestError::BlobMissing(_)
            | IngestError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
