//! Request logging and per-endpoint metrics in one middleware.
//!
//! Every request is logged on completion with its status, body size and
//! duration, and counted in [`AppState`] metrics against its route pattern,
//! e.g. `"GET /api/v1/segment"`. Paths that match no route share one
//! `"unmatched"` entry, so the metrics map stays bounded.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header::CONTENT_LENGTH, Method},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn};

pub struct RequestLogging;

/// Bucket shared by every request whose path matches no route.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Metrics key for a request: method and route pattern, not the raw path.
fn endpoint_key(req: &ServiceRequest) -> String {
    let Some(pattern) = req.match_pattern() else {
        return UNMATCHED_ENDPOINT.to_string();
    };
    let method = match *req.method() {
        Method::GET
        | Method::POST
        | Method::PUT
        | Method::DELETE
        | Method::PATCH
        | Method::HEAD
        | Method::OPTIONS => req.method().as_str(),
        _ => "OTHER",
    };
    format!("{} {}", method, pattern)
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingService { service }))
    }
}

pub struct RequestLoggingService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let endpoint = endpoint_key(&req);
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let content_length = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        warn!(endpoint = %endpoint, path = %path, remote_addr = %remote_addr, status = status.as_u16(), content_length, duration_ms, "Request failed");
                    } else {
                        info!(endpoint = %endpoint, path = %path, remote_addr = %remote_addr, status = status.as_u16(), content_length, duration_ms, "Request completed");
                    }
                    status.is_client_error() || status.is_server_error()
                }
                Err(err) => {
                    error!(endpoint = %endpoint, path = %path, remote_addr = %remote_addr, duration_ms, error = %err, "Request errored");
                    true
                }
            };

            if let Some(state) = state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    state.increment_error_count();
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::MemoryBlobStore;
    use actix_web::{test, App, HttpResponse};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_counts_requests_and_errors() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryBlobStore::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(RequestLogging)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/fail", web::get().to(|| async { HttpResponse::InternalServerError().finish() })),
        )
        .await;

        test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        test::call_service(&app, test::TestRequest::get().uri("/fail").to_request()).await;

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /ok"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /fail"].error_count, 1);
    }

    #[actix_web::test]
    async fn test_metrics_keyed_by_route_pattern() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryBlobStore::new()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(RequestLogging)
                .route("/items/{id}", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for uri in ["/items/1", "/items/2", "/scan/a", "/scan/b", "/scan/c?x=1"] {
            test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.endpoint_metrics.len(), 2);
        assert_eq!(metrics.endpoint_metrics["GET /items/{id}"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics[UNMATCHED_ENDPOINT].request_count, 3);
        assert_eq!(metrics.endpoint_metrics[UNMATCHED_ENDPOINT].error_count, 3);
    }
}
