use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;

use super::{ObjectStore, ObjectStoreError, Precondition, PutOptions, PutResult, StoredObject};

/// Directory under the base path holding per-object metadata.
const META_DIR: &str = ".meta";

/// Local filesystem object store for development and testing.
///
/// Versions are SHA-256 digests of the stored bytes. Conditional writes are
/// checked and applied under a single lock, so they are only atomic with
/// respect to this process. Each object's content type lives in a JSON
/// sidecar under `.meta/`.
pub struct LocalStore {
    base_path: PathBuf,
    public_base_url: String,
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    content_type: String,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(
        base_path: P,
        public_base_url: impl Into<String>,
    ) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            write_lock: Mutex::new(()),
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        let reserved = relative
            .components()
            .next()
            .is_some_and(|c| c.as_os_str() == META_DIR);
        if key.is_empty() || escapes || reserved {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.base_path.join(META_DIR).join(format!("{key}.json"))
    }

    fn public_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        let mut url = Url::parse(&self.public_base_url)
            .map_err(|e| ObjectStoreError::Backend(format!("Invalid public base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Backend("Public base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url.to_string())
    }

    async fn read_existing(path: &Path) -> Result<Option<Bytes>, ObjectStoreError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_content_type(&self, key: &str) -> Result<Option<String>, ObjectStoreError> {
        let Some(raw) = Self::read_existing(&self.meta_path(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<ObjectMeta>(&raw) {
            Ok(meta) => Ok(Some(meta.content_type)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring unreadable object metadata");
                Ok(None)
            }
        }
    }
}

/// Write to a temporary sibling, then rename into place so readers never see
/// a partially written file.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ObjectStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let written = match tokio::fs::write(&tmp_path, data).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), ObjectStoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn content_version(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    digest
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        let path = self.object_path(key)?;
        let url = self.public_url(key)?;
        let _guard = self.write_lock.lock().await;

        if options.precondition != Precondition::None {
            let current = Self::read_existing(&path).await?;
            let satisfied = match (&options.precondition, current) {
                (Precondition::Absent, None) => true,
                (Precondition::Version(expected), Some(existing)) => {
                    *expected == content_version(&existing)
                }
                _ => false,
            };
            if !satisfied {
                return Err(ObjectStoreError::PreconditionFailed(key.to_string()));
            }
        }

        write_atomic(&path, &data).await?;

        let meta = serde_json::to_vec(&ObjectMeta {
            content_type: options.content_type.clone(),
        })
        .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        write_atomic(&self.meta_path(key), &meta).await?;

        Ok(PutResult {
            url,
            version: Some(content_version(&data)),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        let path = self.object_path(key)?;
        let Some(data) = Self::read_existing(&path).await? else {
            return Ok(None);
        };
        Ok(Some(StoredObject {
            version: Some(content_version(&data)),
            content_type: self.read_content_type(key).await?,
            data,
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        let _guard = self.write_lock.lock().await;
        remove_if_exists(&path).await?;
        remove_if_exists(&self.meta_path(key)).await
    }

    fn supports_preconditions(&self) -> bool {
        true
    }
}
