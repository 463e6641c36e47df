use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::{Duration, Instant};

use super::{ObjectStore, ObjectStoreError, Precondition, PutOptions, PutResult, StoredObject};

const API_BASE: &str = "https://storage.googleapis.com";

/// Access tokens are valid for an hour; refresh well before that.
const TOKEN_MAX_AGE: Duration = Duration::from_secs(45 * 60);

/// Google Cloud Storage object store backend.
///
/// Object generations serve as versions, so conditional writes map onto
/// `ifGenerationMatch`.
pub struct GcsStore {
    bucket: String,
    client: Client,
    access_token: tokio::sync::RwLock<CachedToken>,
    credentials_file: Option<String>,
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ObjectResource {
    generation: String,
}

impl GcsStore {
    pub async fn new(bucket: &str, credentials_file: Option<&str>) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let store = Self {
            bucket: bucket.to_string(),
            client,
            access_token: tokio::sync::RwLock::new(CachedToken {
                value: String::new(),
                fetched_at: Instant::now(),
            }),
            credentials_file: credentials_file.map(|s| s.to_string()),
        };

        store.refresh_token().await?;
        Ok(store)
    }

    async fn refresh_token(&self) -> Result<String, anyhow::Error> {
        let token = if let Some(ref creds_path) = self.credentials_file {
            self.token_from_service_account(creds_path).await?
        } else {
            self.token_from_metadata_server().await?
        };

        let mut lock = self.access_token.write().await;
        *lock = CachedToken {
            value: token.clone(),
            fetched_at: Instant::now(),
        };
        Ok(token)
    }

    async fn token(&self) -> Result<String, ObjectStoreError> {
        {
            let cached = self.access_token.read().await;
            if !cached.value.is_empty() && cached.fetched_at.elapsed() < TOKEN_MAX_AGE {
                return Ok(cached.value.clone());
            }
        }
        tracing::debug!("Refreshing GCS access token");
        self.refresh_token()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("GCS token refresh failed: {e}")))
    }

    async fn token_from_service_account(&self, path: &str) -> Result<String, anyhow::Error> {
        let key_json = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey = serde_json::from_str(&key_json)?;

        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.full_control",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        // Build JWT (header.claims.signature)
        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.access_token)
    }

    async fn token_from_metadata_server(&self) -> Result<String, anyhow::Error> {
        let resp: TokenResponse = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.access_token)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ObjectStoreError> {
        let mut url =
            Url::parse(API_BASE).map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Backend("invalid GCS base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn upload_url(&self, key: &str, precondition: &Precondition) -> Result<Url, ObjectStoreError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", self.bucket.as_str(), "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("uploadType", "media")
                .append_pair("name", key)
                .append_pair("predefinedAcl", "publicRead");
            match precondition {
                Precondition::None => {}
                Precondition::Absent => {
                    query.append_pair("ifGenerationMatch", "0");
                }
                Precondition::Version(generation) => {
                    query.append_pair("ifGenerationMatch", generation);
                }
            }
        }
        Ok(url)
    }

    /// JSON API resource URL; `o/{name}` takes the whole key as one encoded segment.
    fn object_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        self.url(&["storage", "v1", "b", self.bucket.as_str(), "o", key])
    }

    fn media_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    /// Public download URL; slashes in the key stay path separators.
    fn public_url(&self, key: &str) -> Result<String, ObjectStoreError> {
        let mut segments = vec![self.bucket.as_str()];
        segments.extend(key.split('/'));
        Ok(self.url(&segments)?.to_string())
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .post(self.upload_url(key, &options.precondition)?)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, &options.content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Err(ObjectStoreError::PreconditionFailed(key.to_string()));
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS upload failed ({status}): {body}"
            )));
        }

        let resource: ObjectResource = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("Invalid GCS upload response: {e}")))?;

        Ok(PutResult {
            url: self.public_url(key)?,
            version: Some(resource.generation),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .get(self.media_url(key)?)
            .bearer_auth(&token)
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
                "GCS download failed ({status}): {body}"
            )));
        }

        let version = resp
            .headers()
            .get("x-goog-generation")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
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
            version,
            content_type,
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .delete(self.object_url(key)?)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS delete failed ({status}): {body}"
            )));
        }

        Ok(())
    }

    fn supports_preconditions(&self) -> bool {
        true
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM armor and decode the base64 body to DER
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, der_b64)?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
