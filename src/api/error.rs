use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::providers::ProviderError;
use crate::services::PredictionError;
use crate::store::StoreError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn respond(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    respond(StatusCode::BAD_REQUEST, message)
}

/// Helper to log error and return generic internal server error
pub fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!("Internal error: {}", err);
    respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub fn prediction_error(err: PredictionError) -> ApiError {
    match err {
        PredictionError::InvalidInput(_) => bad_request(err.to_string()),
        PredictionError::DestinationNotFound(_) => respond(StatusCode::NOT_FOUND, err.to_string()),
        PredictionError::NoRouteFound => respond(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        PredictionError::Store(e) => internal_error(e),
    }
}

pub fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::InvalidRecord(_) => bad_request(err.to_string()),
        StoreError::Database(_) => internal_error(err),
    }
}

/// Upstream failure on a passthrough endpoint
pub fn upstream_error(err: ProviderError) -> ApiError {
    warn!(error = %err, "Upstream provider request failed");
    match err {
        ProviderError::Timeout(_) => respond(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        _ => respond(StatusCode::BAD_GATEWAY, "Upstream provider unavailable"),
    }
}

pub fn unavailable(message: impl Into<String>) -> ApiError {
    respond(StatusCode::SERVICE_UNAVAILABLE, message)
}
