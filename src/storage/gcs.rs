//! Google Cloud Storage backend.
//!
//! Talks to the GCS JSON API directly with `reqwest`:
//! - download: `GET  /storage/v1/b/{bucket}/o/{object}?alt=media`
//! - metadata: `GET  /storage/v1/b/{bucket}/o/{object}`
//! - upload:   `POST /upload/storage/v1/b/{bucket}/o?uploadType=media&name={object}`
//! - delete:   `DELETE /storage/v1/b/{bucket}/o/{object}`
//!
//! Requests carry an OAuth bearer token from [`GcsAuth`]. Normally that is a
//! service-account key (base64 JSON in `GOOGLE_APPLICATION_CREDENTIALS_JSON`),
//! for which `gcp_auth` mints tokens and refreshes them before they expire. A
//! fixed token can be configured instead for emulators and short-lived runs.

use super::{BlobStore, StorageError, StorageResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{header, Client, StatusCode, Url};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// OAuth scope for reading and writing objects.
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Source of the bearer token sent with every request.
#[derive(Clone)]
pub enum GcsAuth {
    /// Token minted outside the process; used as is and never refreshed.
    Static(String),
    /// Service-account key; `gcp_auth` caches the token and refreshes it.
    ServiceAccount(Arc<CustomServiceAccount>),
}

impl GcsAuth {
    /// Service account from a base64-encoded JSON key file.
    pub fn from_service_account_base64(encoded: &str) -> Result<Self, String> {
        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("failed to decode credentials: {}", e))?;
        let json = String::from_utf8(json)
            .map_err(|e| format!("credentials are not UTF-8: {}", e))?;
        let account = CustomServiceAccount::from_json(&json)
            .map_err(|e| format!("failed to parse service account: {}", e))?;
        Ok(GcsAuth::ServiceAccount(Arc::new(account)))
    }

    async fn bearer(&self) -> StorageResult<String> {
        match self {
            GcsAuth::Static(token) => Ok(token.clone()),
            GcsAuth::ServiceAccount(account) => account
                .token(&[STORAGE_SCOPE])
                .await
                .map(|token| token.as_str().to_string())
                .map_err(|e| {
                    StorageError::Unavailable(format!("failed to obtain access token: {}", e))
                }),
        }
    }
}

impl fmt::Debug for GcsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcsAuth::Static(_) => f.write_str("GcsAuth::Static(***)"),
            GcsAuth::ServiceAccount(_) => f.write_str("GcsAuth::ServiceAccount(***)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcsBlobStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    auth: GcsAuth,
}

impl GcsBlobStore {
    pub fn new(endpoint: &str, bucket: &str, auth: GcsAuth) -> StorageResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StorageError::Backend(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            bucket: bucket.to_string(),
            auth,
        })
    }

    /// `{endpoint}/storage/v1/b/{bucket}/o/{key}` with the key as one encoded segment.
    fn object_url(&self, key: &str) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Backend("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(&["storage", "v1", "b", &self.bucket, "o", key]);
        Ok(url)
    }

    fn upload_url(&self) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Backend("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(&["upload", "storage", "v1", "b", &self.bucket, "o"]);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> StorageResult<reqwest::Response> {
        let token = self.auth.bearer().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}

/// Turn a non-success response into the matching error.
async fn status_error(op: &str, key: &str, response: reqwest::Response) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} '{}' failed with {}: {}", op, key, status, body.trim());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Unavailable(message),
        s if s.is_server_error() => StorageError::Unavailable(message),
        _ => StorageError::Backend(message),
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let url = self.object_url(key)?;
        let response = self
            .send(self.client.get(url).query(&[("alt", "media")]))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                debug!(bucket = %self.bucket, key = %key, bytes = bytes.len(), "Downloaded object");
                Ok(Some(bytes.to_vec()))
            }
            _ => Err(status_error("download", key, response).await),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let url = self.upload_url()?;
        let len = data.len();
        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(header::CONTENT_TYPE, content_type)
            .body(data);
        let response = self.send(request).await?;

        if response.status().is_success() {
            debug!(bucket = %self.bucket, key = %key, bytes = len, "Uploaded object");
            Ok(())
        } else {
            Err(status_error("upload", key, response).await)
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let url = self.object_url(key)?;
        let response = self.send(self.client.get(url)).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(status_error("stat", key, response).await),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let url = self.object_url(key)?;
        let response = self.send(self.client.delete(url)).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(status_error("delete", key, response).await),
        }
    }

    fn backend_name(&self) -> &'static str {
        "gcs"
    }
}
