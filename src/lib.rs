//! course-files - Course file uploads backed by a hosted blob store
//!
//! This crate provides two endpoints over an object store:
//! - Multipart upload of course files, one public blob per file
//! - A listing of every upload, kept as a single JSON index document
//!
//! Index appends are applied one at a time by a writer task and use
//! conditional writes where the backend supports them, so concurrent uploads
//! do not lose each other's records.

pub mod api;
pub mod config;
pub mod index;
pub mod keys;
pub mod object_store;

use std::sync::Arc;

use config::Config;
use index::IndexHandle;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub index: IndexHandle,
    pub object_store: Arc<dyn object_store::ObjectStore>,
}
