//! Mapping of platform errors onto HTTP responses

use api_models::ErrorResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::errors::PlatformError;

/// Error returned by request handlers
#[derive(Debug)]
pub struct ApiError(pub PlatformError);

impl From<PlatformError> for ApiError {
    fn from(e: PlatformError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
            PlatformError::QueueFull | PlatformError::QueueClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PlatformError::AlreadyInProgress(_) | PlatformError::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            PlatformError::ConfigError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PlatformError::Timeout(..) => StatusCode::GATEWAY_TIMEOUT,
            PlatformError::CommandFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
