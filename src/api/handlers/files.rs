use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::AppState;

/// Shared caches may serve the listing for a minute, then stale for two more
/// while they revalidate.
pub const LISTING_CACHE_CONTROL: &str = "s-maxage=60, stale-while-revalidate=120";

/// Return the index document as stored, or `[]` if nothing was uploaded yet.
pub async fn list_files(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let document = state
        .index
        .read_json()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok((
        [(
            header::CACHE_CONTROL,
            HeaderValue::from_static(LISTING_CACHE_CONTROL),
        )],
        Json(document),
    )
        .into_response())
}
