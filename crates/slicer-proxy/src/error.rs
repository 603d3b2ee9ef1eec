//! HTTP error mapping for the proxy surface.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use slicer_core::AppError;

/// Wire shape of an error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }
}

/// Newtype so `AppError` can cross the axum boundary.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &err {
            // internals are logged, not leaked
            AppError::RasterFailed(_) | AppError::StorageFailed(_) | AppError::RegistryFailed(_) => {
                "internal server error".to_string()
            }
            AppError::SpecInvalid { .. } => "the given transformation spec is invalid".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %err, code = err.error_code(), "request failed");
        } else {
            tracing::debug!(error = %err, code = err.error_code(), "request rejected");
        }

        let body = ErrorResponse {
            error: message,
            code: err.error_code().to_string(),
            details: err.details().cloned(),
        };

        (status, Json(body)).into_response()
    }
}
