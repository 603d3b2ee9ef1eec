//! HTTP handlers for the proxy surface.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::io::ReaderStream;

use slicer_core::AppError;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

/// Route-level extension allowlist; `webp` is routable but rejected by the
/// converter until it becomes a servable target.
const ROUTABLE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Buffer between the pipeline writer and the response body stream.
const RESPONSE_PIPE_CAPACITY: usize = 64 * 1024;

#[utoipa::path(
    get,
    path = "/v1/images/{image_id}/{file}",
    tag = "images",
    params(
        ("image_id" = String, Path, description = "Image ID"),
        ("file" = String, Path, description = "Transformation spec plus extension, e.g. `h200_w400_q80.png`")
    ),
    responses(
        (status = 200, description = "The derivative image", content_type = "image/*"),
        (status = 400, description = "Malformed image id", body = ErrorResponse),
        (status = 404, description = "Unknown image or route", body = ErrorResponse),
        (status = 422, description = "Invalid transformation spec", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn proxy_image(
    Path((image_id, file)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, HttpAppError> {
    let (spec, extension) = split_spec_and_extension(&file)?;

    let (transformation, image) = state.proxy.prepare(&image_id, spec, extension).await?;

    tracing::debug!(
        image_id = %image.id,
        spec = %spec,
        extension = %extension,
        filename = %transformation.filename(),
        "proxying image"
    );

    let (mut writer, reader) = tokio::io::duplex(RESPONSE_PIPE_CAPACITY);

    let proxy = Arc::clone(&state.proxy);
    let serve_transformation = transformation.clone();
    tokio::spawn(async move {
        match proxy.serve(&mut writer, &serve_transformation, &image).await {
            Ok(served) => {
                tracing::debug!(
                    image_id = %served.image_id,
                    filename = %served.filename,
                    size_bytes = served.size,
                    "request served"
                );
            }
            Err(err) => {
                // headers are gone; the body is simply truncated
                tracing::error!(error = %err, "streaming failed mid-response");
            }
        }
    });

    // Optimistic headers: the mime is known from the normalized
    // transformation before any byte is produced.
    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(transformation.mime())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename={}.{}", spec, extension))
            .unwrap_or(HeaderValue::from_static("attachment")),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    // prevent stored-XSS via crafted image bodies
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("script-src 'none'"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Ok(response)
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn openapi() -> impl IntoResponse {
    Json(crate::api_doc::openapi())
}

pub async fn not_found() -> HttpAppError {
    HttpAppError(AppError::NotFound("route not found".to_string()))
}

/// Split `h200_w400.png` into spec and extension, enforcing the route's
/// character set.
fn split_spec_and_extension(file: &str) -> Result<(&str, &str), HttpAppError> {
    let (spec, extension) = file
        .rsplit_once('.')
        .ok_or_else(|| AppError::NotFound("route not found".to_string()))?;

    if !ROUTABLE_EXTENSIONS.contains(&extension) {
        return Err(AppError::NotFound("route not found".to_string()).into());
    }

    if spec.is_empty()
        || !spec
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::NotFound("route not found".to_string()).into());
    }

    Ok((spec, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_spec_and_extension() {
        assert_eq!(
            split_spec_and_extension("h200_w400.png").unwrap(),
            ("h200_w400", "png")
        );
        assert_eq!(
            split_spec_and_extension("c20_fit_h200.jpeg").unwrap(),
            ("c20_fit_h200", "jpeg")
        );

        assert!(split_spec_and_extension("h200").is_err());
        assert!(split_spec_and_extension("h200.gif").is_err());
        assert!(split_spec_and_extension(".png").is_err());
        assert!(split_spec_and_extension("h200 w400.png").is_err());
    }
}
