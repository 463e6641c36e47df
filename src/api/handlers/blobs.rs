use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::AppState;

/// Serve raw object content by key.
/// Route: GET /blobs/*key
pub async fn serve_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let object = state
        .object_store
        .get(&key)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to retrieve blob: {e}")))?
        .ok_or_else(|| ApiError::not_found("Blob not found"))?;

    let byte_size = object.data.len() as u64;
    let content_type = object
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| mime_guess::from_path(&key).first_or_octet_stream().to_string());

    let mut response = (StatusCode::OK, object.data).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = content_type.parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }

    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(byte_size));

    // Keys embed an upload timestamp, so file content never changes in place
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}
