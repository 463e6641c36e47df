mod blobs;
mod files;
mod health;
mod upload;

use crate::api::response::ApiError;

pub use blobs::serve_blob;
pub use files::{list_files, LISTING_CACHE_CONTROL};
pub use health::{health, HealthResponse};
pub use upload::{upload_files, UploadResponse};

/// Fallback for routes hit with a verb they do not accept.
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
