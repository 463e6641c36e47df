use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local,
    Vercel,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// URL prefix under which local objects are reachable
    pub public_base_url: String,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to ADC)
    pub gcs_credentials_file: Option<String>,
    /// Vercel Blob read-write token (required when backend is vercel)
    pub blob_token: Option<String>,
    pub blob_api_url: String,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Object key of the shared index document
    pub key: String,
    /// Conditional-write attempts per append before giving up
    pub max_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            public_base_url: "http://localhost:8080/blobs".to_string(),
            gcs_bucket: None,
            gcs_credentials_file: None,
            blob_token: None,
            blob_api_url: "https://blob.vercel-storage.com".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            key: "quickinfo-files.json".to_string(),
            max_attempts: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            index: IndexConfig::default(),
            max_upload_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let bind_address = lookup("BIND_ADDRESS").unwrap_or(defaults.server.bind_address);

        let max_upload_size = lookup("MAX_UPLOAD_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_upload_size);

        let backend = match lookup("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            "vercel" => StorageBackend::Vercel,
            "local" => StorageBackend::Local,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown STORAGE_BACKEND '{other}' (expected local, gcs or vercel)"
                )))
            }
        };

        let storage = StorageConfig {
            backend,
            local_storage_path: lookup("LOCAL_STORAGE_PATH")
                .unwrap_or(defaults.storage.local_storage_path),
            public_base_url: lookup("PUBLIC_BASE_URL").unwrap_or(defaults.storage.public_base_url),
            gcs_bucket: lookup("GCS_BUCKET"),
            gcs_credentials_file: lookup("GCS_CREDENTIALS_FILE"),
            blob_token: lookup("BLOB_READ_WRITE_TOKEN"),
            blob_api_url: lookup("BLOB_API_URL").unwrap_or(defaults.storage.blob_api_url),
        };

        let index = IndexConfig {
            key: lookup("INDEX_KEY").unwrap_or(defaults.index.key),
            max_attempts: lookup("INDEX_MAX_RETRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.index.max_attempts),
        };

        let config = Config {
            server: ServerConfig { bind_address },
            storage,
            index,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Gcs && self.storage.gcs_bucket.is_none() {
            return Err(ConfigError::ValidationError(
                "GCS_BUCKET is required when STORAGE_BACKEND=gcs".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Vercel && self.storage.blob_token.is_none() {
            return Err(ConfigError::ValidationError(
                "BLOB_READ_WRITE_TOKEN is required when STORAGE_BACKEND=vercel".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Local
            && reqwest::Url::parse(&self.storage.public_base_url)
                .map_or(true, |url| url.cannot_be_a_base())
        {
            return Err(ConfigError::ValidationError(format!(
                "PUBLIC_BASE_URL is not a valid base URL: {}",
                self.storage.public_base_url
            )));
        }

        if self.index.key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "INDEX_KEY cannot be empty".to_string(),
            ));
        }

        if self.index.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "INDEX_MAX_RETRIES must be at least 1".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
