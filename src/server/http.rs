//! HTTP transport for the RPC services.
//!
//! Every method is served at `POST /{Service}/{Method}` with the request
//! message as the JSON body. Request metadata travels as HTTP headers in
//! both directions. Failures answer with the mapped HTTP status and a
//! JSON [`Status`] body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::service::UnaryService;
use crate::error::{Result, Status};
use crate::types::{Metadata, Request, RpcKind, RpcRequest};

type SharedService = Arc<dyn UnaryService>;

/// Builds the router for `service`.
pub fn router<S: UnaryService + 'static>(service: S) -> Router {
    let service: SharedService = Arc::new(service);
    Router::new()
        .route("/{service}/{method}", post(handle))
        .with_state(service)
}

/// Serves `service` on `listener` until the task is dropped.
pub async fn serve<S: UnaryService + 'static>(listener: TcpListener, service: S) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "Serving RPCs over HTTP");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn handle(
    State(service): State<SharedService>,
    Path((service_name, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    match dispatch(service.as_ref(), &service_name, &method, &headers, &body).await {
        Ok(response) => response,
        Err(status) => error_response(status),
    }
}

async fn dispatch(
    service: &dyn UnaryService,
    service_name: &str,
    method: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> std::result::Result<HttpResponse, Status> {
    let kind = RpcKind::from_names(service_name, method)
        .ok_or_else(|| Status::not_found(format!("no method {service_name}/{method}")))?;
    let message = RpcRequest::from_json(kind, body)
        .map_err(|e| Status::invalid_argument(format!("malformed {kind} request: {e}")))?;
    let metadata: Metadata = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();
    debug!(%kind, "HTTP call");

    let (metadata, message) = service
        .call(Request::new(message).with_metadata(metadata))
        .await?
        .into_parts();
    let body = message.to_json().map_err(|e| Status::internal(e.to_string()))?;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response();
    for (name, value) in metadata.iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    Ok(response)
}

fn error_response(status: Status) -> HttpResponse {
    debug!(code = %status.code, message = %status.message, "HTTP call failed");
    (status.code.http_status(), Json(status)).into_response()
}
