//! Unified error type for the slicer workspace.
//!
//! Every failure the proxy can surface maps to exactly one `AppError` kind,
//! and every kind maps to exactly one HTTP status. Field-level validation
//! messages for transformation specs travel in the `SpecInvalid` details map.

use std::collections::BTreeMap;

use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid transformation spec")]
    SpecInvalid { details: BTreeMap<String, String> },

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transformation refused: {0}")]
    TransformationRefused(String),

    #[error("raster operation failed: {0}")]
    RasterFailed(String),

    #[error("storage operation failed: {0}")]
    StorageFailed(String),

    #[error("registry operation failed: {0}")]
    RegistryFailed(String),

    #[error("request cancelled: {0}")]
    Cancelled(String),
}

impl AppError {
    /// Build a `SpecInvalid` with a single field message.
    pub fn spec_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut details = BTreeMap::new();
        details.insert(field.into(), message.into());
        AppError::SpecInvalid { details }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AppError::SpecInvalid { .. } => 422,
            AppError::BadInput(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::TransformationRefused(_) => 422,
            AppError::RasterFailed(_) => 500,
            AppError::StorageFailed(_) => 500,
            AppError::RegistryFailed(_) => 500,
            AppError::Cancelled(_) => 499,
        }
    }

    /// Machine-readable error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::SpecInvalid { .. } => "SPEC_INVALID",
            AppError::BadInput(_) => "BAD_INPUT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::TransformationRefused(_) => "TRANSFORMATION_REFUSED",
            AppError::RasterFailed(_) => "RASTER_FAILED",
            AppError::StorageFailed(_) => "STORAGE_FAILED",
            AppError::RegistryFailed(_) => "REGISTRY_FAILED",
            AppError::Cancelled(_) => "CANCELLED",
        }
    }

    /// Field-level details, present only for spec validation failures.
    pub fn details(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            AppError::SpecInvalid { details } => Some(details),
            _ => None,
        }
    }
}

impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        match err {
            SqlxError::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::RegistryFailed(other.to_string()),
        }
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::BadInput(format!("invalid id: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::spec_invalid("segments", "x").http_status(), 422);
        assert_eq!(AppError::BadInput("bad id".into()).http_status(), 400);
        assert_eq!(AppError::NotFound("image".into()).http_status(), 404);
        assert_eq!(
            AppError::TransformationRefused("upscale".into()).http_status(),
            422
        );
        assert_eq!(AppError::RasterFailed("decode".into()).http_status(), 500);
        assert_eq!(AppError::StorageFailed("put".into()).http_status(), 500);
        assert_eq!(AppError::RegistryFailed("tx".into()).http_status(), 500);
        assert_eq!(AppError::Cancelled("deadline".into()).http_status(), 499);
    }

    #[test]
    fn test_spec_invalid_details() {
        let err = AppError::spec_invalid("segments", "no valid segments provided");
        let details = err.details().unwrap();
        assert_eq!(
            details.get("segments").map(String::as_str),
            Some("no valid segments provided")
        );
        assert_eq!(err.error_code(), "SPEC_INVALID");
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err = AppError::from(SqlxError::RowNotFound);
        assert!(matches!(err, AppError::NotFound(_)));

        let err = AppError::from(SqlxError::PoolClosed);
        assert!(matches!(err, AppError::RegistryFailed(_)));
    }
}
