use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{ObjectStore, ObjectStoreError, Precondition, PutOptions, PutResult, StoredObject};

const API_VERSION: &str = "7";

/// Vercel Blob object store backend.
///
/// The Blob API has no conditional writes, so preconditions are rejected
/// rather than silently ignored.
pub struct VercelBlobStore {
    api_url: String,
    client: Client,
    token: String,
}

#[derive(Deserialize)]
struct PutBlobResponse {
    url: String,
}

#[derive(Deserialize)]
struct HeadBlobResponse {
    url: String,
}

#[derive(Serialize)]
struct DeleteBlobRequest<'a> {
    urls: [&'a str; 1],
}

impl VercelBlobStore {
    pub fn new(api_url: &str, token: &str) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
            token: token.to_string(),
        })
    }

    fn blob_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url =
            Url::parse(&self.api_url).map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Backend("invalid blob API URL".to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    fn head_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url =
            Url::parse(&self.api_url).map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        url.query_pairs_mut().append_pair("url", key);
        Ok(url)
    }

    fn delete_url(&self) -> Result<Url, ObjectStoreError> {
        self.blob_url("delete")
    }

    /// Resolve a pathname to its public URL, or `None` if no such blob exists.
    async fn head(&self, key: &str) -> Result<Option<String>, ObjectStoreError> {
        let resp = self
            .client
            .get(self.head_url(key)?)
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "Blob lookup failed ({status}): {body}"
            )));
        }

        let head: HeadBlobResponse = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("Invalid blob lookup response: {e}")))?;
        Ok(Some(head.url))
    }
}

#[async_trait]
impl ObjectStore for VercelBlobStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        if options.precondition != Precondition::None {
            return Err(ObjectStoreError::Backend(
                "Vercel Blob does not support conditional writes".to_string(),
            ));
        }

        let resp = self
            .client
            .put(self.blob_url(key)?)
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .header("x-content-type", &options.content_type)
            .header("x-add-random-suffix", "0")
            .header("x-allow-overwrite", "1")
            .body(data)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "Blob upload failed ({status}): {body}"
            )));
        }

        let blob: PutBlobResponse = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("Invalid blob upload response: {e}")))?;

        Ok(PutResult {
            url: blob.url,
            version: None,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        let Some(url) = self.head(key).await? else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        // Deleted between lookup and download
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(ObjectStoreError::Backend(format!(
                "Blob download failed ({status})"
            )));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let data = resp
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        Ok(Some(StoredObject {
            data,
            version: None,
            content_type,
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let Some(url) = self.head(key).await? else {
            return Ok(());
        };

        let resp = self
            .client
            .post(self.delete_url()?)
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .json(&DeleteBlobRequest { urls: [url.as_str()] })
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "Blob delete failed ({status}): {body}"
            )));
        }

        Ok(())
    }
}
