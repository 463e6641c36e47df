mod gcs;
mod local;
mod vercel;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use vercel::VercelBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Precondition failed for object: {0}")]
    PreconditionFailed(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Condition a write must satisfy against the object currently stored under the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Precondition {
    #[default]
    None,
    /// Only write if nothing is stored under the key yet.
    Absent,
    /// Only write if the stored object still has this version.
    Version(String),
}

#[derive(Debug, Clone)]
pub struct PutOptions {
    pub content_type: String,
    pub precondition: Precondition,
}

impl PutOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            precondition: Precondition::None,
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }
}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct PutResult {
    /// Public URL the object can be read from.
    pub url: String,
    /// Version token of the written object, if the backend tracks one.
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub version: Option<String>,
    /// Content type the object was written with, if the backend reports it.
    pub content_type: Option<String>,
}

/// Abstraction over hosted blob storage.
///
/// Every object is written publicly readable. `get` returns `Ok(None)` for a
/// missing key; only transport and backend failures are errors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Whether `PutOptions::precondition` is enforced by this backend.
    fn supports_preconditions(&self) -> bool {
        false
    }
}
