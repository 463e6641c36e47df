use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppMultipart};
use crate::index::{new_file_id, FileRecord};
use crate::keys::BatchKeys;
use crate::object_store::PutOptions;
use crate::AppState;

const COURSE_ID_FIELD: &str = "courseId";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub uploaded: usize,
}

/// A file part, fully buffered.
#[derive(Debug)]
struct PendingFile {
    name: String,
    mime_type: String,
    data: Bytes,
}

#[derive(Debug, Default)]
struct UploadForm {
    course_id: Option<String>,
    files: Vec<PendingFile>,
}

/// A file already written to the object store.
struct StoredFile {
    key: String,
    name: String,
    mime_type: String,
    url: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    AppMultipart(mut multipart): AppMultipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_form(&mut multipart, state.config.max_upload_size).await?;

    let course_id = form
        .course_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing courseId"))?;

    if form.files.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    // Phase 1: Upload each file's bytes, one after another
    let mut keys = BatchKeys::new();
    let mut stored: Vec<StoredFile> = Vec::with_capacity(form.files.len());
    for file in form.files {
        let key = keys.next(&course_id, Utc::now().timestamp_millis(), &file.name);
        let options = PutOptions::new(file.mime_type.as_str());

        match state.object_store.put(&key, file.data, &options).await {
            Ok(result) => stored.push(StoredFile {
                key,
                name: file.name,
                mime_type: file.mime_type,
                url: result.url,
            }),
            Err(e) => {
                discard_stored(&state, &stored).await;
                return Err(ApiError::internal(format!("Failed to store file: {e}")));
            }
        }
    }

    // Phase 2: Record them in the shared index
    let uploaded_at = Utc::now().timestamp_millis();
    let records: Vec<FileRecord> = stored
        .iter()
        .map(|file| FileRecord {
            id: new_file_id(),
            course_id: course_id.clone(),
            name: file.name.clone(),
            blob_url: file.url.clone(),
            mime_type: file.mime_type.clone(),
            uploaded_at,
        })
        .collect();

    if let Err(e) = state.index.append(records).await {
        discard_stored(&state, &stored).await;
        return Err(ApiError::internal(e.to_string()));
    }

    tracing::debug!(course_id = %course_id, uploaded = stored.len(), "Uploaded course files");

    Ok(Json(UploadResponse {
        success: true,
        uploaded: stored.len(),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Drain the multipart stream, keeping `courseId` and every named file part.
async fn read_form(multipart: &mut Multipart, max_upload_size: u64) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        match field.file_name().map(|s| s.to_string()) {
            // An untouched file input still sends a part, just without a name
            Some(file_name) if file_name.is_empty() => continue,
            Some(file_name) => {
                let declared_type = field.content_type().map(|s| s.to_string());
                let data = field.bytes().await?;

                if data.len() as u64 > max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {max_upload_size} bytes"
                    )));
                }

                form.files.push(PendingFile {
                    mime_type: resolve_mime_type(declared_type.as_deref(), &file_name),
                    name: file_name,
                    data,
                });
            }
            None if field.name() == Some(COURSE_ID_FIELD) => {
                form.course_id = Some(field.text().await?);
            }
            None => {
                // Ignore unknown fields
            }
        }
    }

    Ok(form)
}

/// MIME type from the part's Content-Type, or guessed from the filename, or a fallback.
fn resolve_mime_type(declared: Option<&str>, file_name: &str) -> String {
    declared
        .filter(|ct| !ct.is_empty())
        .map(|ct| ct.to_string())
        .or_else(|| mime_guess::from_path(file_name).first().map(|m| m.to_string()))
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

/// Best-effort removal of blobs that will never make it into the index.
async fn discard_stored(state: &AppState, stored: &[StoredFile]) {
    for file in stored {
        if let Err(e) = state.object_store.delete(&file.key).await {
            tracing::warn!(key = %file.key, error = %e, "Failed to remove orphaned blob");
        }
    }
}
