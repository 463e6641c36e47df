use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    Router::new()
        // Course files
        .route(
            "/api/upload",
            post(handlers::upload_files)
                .fallback(handlers::method_not_allowed)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/files",
            get(handlers::list_files).fallback(handlers::method_not_allowed),
        )
        // Public URLs handed out by the local backend
        .route("/blobs/*key", get(handlers::serve_blob))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
