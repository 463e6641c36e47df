use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error body
// ============================================================================

/// Body of every failed response: `{"error": "<message>"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ============================================================================
// Unified error type for handlers
// ============================================================================

/// Either a client-side failure (4xx) or a server-side error (5xx).
/// Both render as an [`ErrorBody`]; server errors are also logged.
#[derive(Debug)]
pub enum ApiError {
    Fail(StatusCode, String),
    Error(StatusCode, String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Fail(code, msg) => (code, msg),
            ApiError::Error(code, msg) => {
                tracing::error!(status = %code, error = %msg, "Request failed");
                (code, msg)
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::NOT_FOUND, message.into())
    }

    pub fn method_not_allowed() -> Self {
        ApiError::Fail(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::PAYLOAD_TOO_LARGE, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Fail(code, _) | ApiError::Error(code, _) => *code,
        }
    }
}

impl From<MultipartError> for ApiError {
    /// Body-limit overruns are the client's fault; anything else that breaks
    /// parsing is reported as a server error with the parser's message.
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::payload_too_large(e.body_text())
        } else {
            ApiError::internal(format!("Failed to parse upload: {}", e.body_text()))
        }
    }
}

// ============================================================================
// Custom extractors (reject with ApiError bodies)
// ============================================================================

/// Drop-in replacement for `axum::extract::Multipart` that rejects with an [`ErrorBody`].
pub struct AppMultipart(pub Multipart);

#[axum::async_trait]
impl<S> FromRequest<S> for AppMultipart
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        Multipart::from_request(req, state)
            .await
            .map(AppMultipart)
            .map_err(|rejection| {
                ApiError::internal(format!("Failed to parse upload: {}", rejection.body_text()))
            })
    }
}
