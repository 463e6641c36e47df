//! Shared test helpers for course-files integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use course_files::config::{Config, IndexConfig};
use course_files::index::{Index, IndexHandle};
use course_files::object_store::{
    ObjectStore, ObjectStoreError, Precondition, PutOptions, PutResult, StoredObject,
};
use course_files::AppState;

pub const INDEX_KEY: &str = "quickinfo-files.json";
pub const BOUNDARY: &str = "course-files-test-boundary";
pub const PUBLIC_BASE: &str = "http://localhost/blobs";

// ============================================================================
// In-memory object store
// ============================================================================

#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub content_type: String,
    version: u64,
}

/// Object store kept in a map, with write counting and failure injection.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, MemoryObject>>,
    next_version: AtomicU64,
    puts: AtomicUsize,
    failing_key: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of successful writes so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make every write to `key` fail with a backend error.
    pub fn fail_puts_to(&self, key: &str) {
        *self.failing_key.lock().unwrap() = Some(key.to_string());
    }

    pub fn object(&self, key: &str) -> Option<MemoryObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn course_keys(&self) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with("courses/"))
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        if self.failing_key.lock().unwrap().as_deref() == Some(key) {
            return Err(ObjectStoreError::Backend(format!("injected failure for {key}")));
        }

        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(key).map(|o| o.version.to_string());
        let satisfied = match &options.precondition {
            Precondition::None => true,
            Precondition::Absent => current.is_none(),
            Precondition::Version(expected) => current.as_deref() == Some(expected.as_str()),
        };
        if !satisfied {
            return Err(ObjectStoreError::PreconditionFailed(key.to_string()));
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        objects.insert(
            key.to_string(),
            MemoryObject {
                data,
                content_type: options.content_type.clone(),
                version,
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);

        Ok(PutResult {
            url: format!("{PUBLIC_BASE}/{key}"),
            version: Some(version.to_string()),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        Ok(self.objects.lock().unwrap().get(key).map(|o| StoredObject {
            data: o.data.clone(),
            version: Some(o.version.to_string()),
            content_type: Some(o.content_type.clone()),
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn supports_preconditions(&self) -> bool {
        true
    }
}

// ============================================================================
// App state and requests
// ============================================================================

pub fn index_config() -> IndexConfig {
    IndexConfig {
        key: INDEX_KEY.to_string(),
        max_attempts: 3,
    }
}

/// Create a test AppState over the given store. Must run inside a tokio runtime.
pub fn test_state(store: Arc<dyn ObjectStore>) -> Arc<AppState> {
    let config = Config {
        index: index_config(),
        max_upload_size: 64 * 1024,
        ..Config::default()
    };

    let (index, _writer) = IndexHandle::spawn(Index::new(Arc::clone(&store), &config.index));

    Arc::new(AppState {
        config,
        index,
        object_store: store,
    })
}

pub enum Part<'a> {
    Text {
        name: &'a str,
        value: &'a str,
    },
    File {
        name: &'a str,
        filename: &'a str,
        content_type: Option<&'a str>,
        data: &'a [u8],
    },
}

pub fn text(name: &'static str, value: &'static str) -> Part<'static> {
    Part::Text { name, value }
}

pub fn file<'a>(filename: &'a str, content_type: &'a str, data: &'a [u8]) -> Part<'a> {
    Part::File {
        name: "files",
        filename,
        content_type: Some(content_type),
        data,
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                    )
                    .as_bytes(),
                );
                if let Some(content_type) = content_type {
                    body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
                }
                body.extend_from_slice(b"\r\n");
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body should be JSON")
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}
