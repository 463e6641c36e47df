//! The shared index document: a JSON array with one entry per uploaded file.
//!
//! Reads go straight to the object store. Appends are funneled through the
//! [`IndexHandle`] writer task so that they apply one at a time, and each
//! append is a conditional write when the backend supports it.

pub mod models;
mod writer;

pub use models::{new_file_id, FileRecord};
pub use writer::IndexHandle;

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::IndexConfig;
use crate::object_store::{ObjectStore, ObjectStoreError, Precondition, PutOptions};

const INDEX_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{0}")]
    Store(#[from] ObjectStoreError),
    #[error("Invalid index document: {0}")]
    Decode(serde_json::Error),
    #[error("Index document must be a JSON array")]
    NotAnArray,
    #[error("Failed to encode index document: {0}")]
    Encode(serde_json::Error),
    #[error("Index update kept conflicting with concurrent writers after {0} attempts")]
    Conflict(u32),
    #[error("Index writer is not running")]
    WriterClosed,
}

/// Entries currently stored, plus the condition a write-back must satisfy.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub entries: Vec<Value>,
    pub precondition: Precondition,
}

pub struct Index {
    store: Arc<dyn ObjectStore>,
    key: String,
    max_attempts: u32,
}

impl Index {
    pub fn new(store: Arc<dyn ObjectStore>, config: &IndexConfig) -> Self {
        Self {
            store,
            key: config.key.clone(),
            max_attempts: config.max_attempts,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The stored document as JSON, or an empty array if it does not exist yet.
    pub async fn read_json(&self) -> Result<Value, IndexError> {
        match self.store.get(&self.key).await? {
            Some(object) => decode_document(&object.data),
            None => Ok(Value::Array(Vec::new())),
        }
    }

    /// Read the document for modification.
    pub async fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let Some(object) = self.store.get(&self.key).await? else {
            return Ok(IndexSnapshot {
                entries: Vec::new(),
                precondition: Precondition::Absent,
            });
        };

        let entries = match decode_document(&object.data)? {
            Value::Array(entries) => entries,
            _ => return Err(IndexError::NotAnArray),
        };
        let precondition = object
            .version
            .map(Precondition::Version)
            .unwrap_or(Precondition::None);

        Ok(IndexSnapshot {
            entries,
            precondition,
        })
    }

    /// Append records to the end of the document and write it back in full.
    ///
    /// Returns the number of entries in the document after the append.
    pub async fn append(&self, records: &[FileRecord]) -> Result<usize, IndexError> {
        let new_entries = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::Encode)?;
        let conditional = self.store.supports_preconditions();

        for attempt in 1..=self.max_attempts {
            let snapshot = self.snapshot().await?;
            let mut entries = snapshot.entries;
            entries.extend(new_entries.iter().cloned());

            let body = serde_json::to_vec_pretty(&entries).map_err(IndexError::Encode)?;
            let precondition = if conditional {
                snapshot.precondition
            } else {
                Precondition::None
            };
            let options = PutOptions::new(INDEX_CONTENT_TYPE).with_precondition(precondition);

            match self.store.put(&self.key, Bytes::from(body), &options).await {
                Ok(_) => return Ok(entries.len()),
                Err(ObjectStoreError::PreconditionFailed(_)) => {
                    tracing::warn!(
                        key = %self.key,
                        attempt,
                        "Index changed during update, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(IndexError::Conflict(self.max_attempts))
    }
}

/// Decode stored index bytes. Empty content counts as an empty array.
pub fn decode_document(data: &[u8]) -> Result<Value, IndexError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Array(Vec::new()));
    }
    serde_json::from_slice(data).map_err(IndexError::Decode)
}
