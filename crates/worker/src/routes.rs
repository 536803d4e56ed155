//! Ops endpoint: `/health`, `/metrics` and message ingress.

use crate::metrics::metrics_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use ferry_core::{
    CookieRevoked, ExportRequest, Message, RecheckRequest, ResolveRequest, Route, UploadRequest,
};
use ferry_metadata::MetadataStore;
use ferry_queue::{Broker, Publisher, QueueError};
use ferry_storage::ObjectStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Handles the ops endpoint requests.
#[derive(Clone)]
pub struct OpsState {
    pub metadata: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub broker: Arc<dyn Broker>,
    pub publisher: Publisher,
}

/// Error body for rejected requests.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

/// Ops endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error("no queue named {0}")]
    UnknownQueue(String),

    #[error("{0}")]
    InvalidMessage(#[from] ferry_core::Error),

    #[error("publish failed: {0}")]
    Queue(#[from] QueueError),
}

impl OpsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownQueue(_) => "not_found",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Queue(_) => "queue_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownQueue(_) => StatusCode::NOT_FOUND,
            Self::InvalidMessage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for OpsError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Accepted message.
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub routing_key: &'static str,
    pub message_id: String,
}

async fn publish_as<M: Message>(publisher: &Publisher, body: &[u8]) -> Result<String, OpsError> {
    let message = M::decode(body)?;
    Ok(publisher.publish(&message).await?)
}

/// POST /messages/{queue} - Validate a JSON message and publish it on the
/// route owned by `queue`.
pub async fn publish_message(
    State(state): State<OpsState>,
    Path(queue): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<PublishResponse>), OpsError> {
    let route = Route::from_queue(&queue).ok_or(OpsError::UnknownQueue(queue))?;
    let publisher = &state.publisher;
    let message_id = match route {
        Route::ExportDrive => publish_as::<ExportRequest>(publisher, &body).await?,
        Route::Source => publish_as::<ResolveRequest>(publisher, &body).await?,
        Route::Cookie => publish_as::<CookieRevoked>(publisher, &body).await?,
        Route::Recheck => publish_as::<RecheckRequest>(publisher, &body).await?,
        Route::Upload => publish_as::<UploadRequest>(publisher, &body).await?,
    };
    tracing::info!(route = %route, message_id = %message_id, "message accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            routing_key: route.routing_key(),
            message_id,
        }),
    ))
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Failing dependencies and their errors.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<&'static str, String>,
}

/// GET /health - Check every backing service.
pub async fn health_check(State(state): State<OpsState>) -> (StatusCode, Json<HealthResponse>) {
    let mut failures = BTreeMap::new();
    if let Err(e) = state.metadata.health_check().await {
        failures.insert("metadata", e.to_string());
    }
    if let Err(e) = state.storage.health_check().await {
        failures.insert("storage", e.to_string());
    }
    if let Err(e) = state.broker.health_check().await {
        failures.insert("broker", e.to_string());
    }

    let (status, label) = if failures.is_empty() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            failures,
        }),
    )
}

/// Create the ops router.
pub fn create_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/messages/{queue}", post(publish_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
