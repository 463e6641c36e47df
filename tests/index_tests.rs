mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use course_files::index::{FileRecord, Index, IndexError, IndexHandle};
use course_files::object_store::{
    LocalStore, ObjectStore, ObjectStoreError, Precondition, PutOptions, PutResult, StoredObject,
};

use common::{index_config, INDEX_KEY, PUBLIC_BASE};

fn local_store() -> (tempfile::TempDir, Arc<LocalStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(dir.path(), PUBLIC_BASE).unwrap());
    (dir, store)
}

fn record(name: &str) -> FileRecord {
    FileRecord {
        id: course_files::index::new_file_id(),
        course_id: "c1".to_string(),
        name: name.to_string(),
        blob_url: format!("{PUBLIC_BASE}/courses/c1/1-{name}"),
        mime_type: "text/plain".to_string(),
        uploaded_at: 1_700_000_000_000,
    }
}

async fn stored_records(store: &dyn ObjectStore) -> Vec<FileRecord> {
    let object = store.get(INDEX_KEY).await.unwrap().expect("index should exist");
    serde_json::from_slice(&object.data).unwrap()
}

// ============================================================================
// Reading
// ============================================================================

#[tokio::test]
async fn test_read_missing_index_is_empty_array() {
    let (_dir, store) = local_store();
    let index = Index::new(store, &index_config());

    assert_eq!(index.read_json().await.unwrap(), serde_json::json!([]));
}

#[tokio::test]
async fn test_read_empty_index_is_empty_array() {
    let (_dir, store) = local_store();
    store
        .put(INDEX_KEY, Bytes::new(), &PutOptions::new("application/json"))
        .await
        .unwrap();
    let index = Index::new(store, &index_config());

    assert_eq!(index.read_json().await.unwrap(), serde_json::json!([]));
}

#[tokio::test]
async fn test_read_corrupt_index_fails() {
    let (_dir, store) = local_store();
    store
        .put(INDEX_KEY, Bytes::from("[{"), &PutOptions::new("application/json"))
        .await
        .unwrap();
    let index = Index::new(store, &index_config());

    assert!(matches!(
        index.read_json().await,
        Err(IndexError::Decode(_))
    ));
}

// ============================================================================
// Appending
// ============================================================================

#[tokio::test]
async fn test_append_creates_pretty_printed_document() {
    let (dir, store) = local_store();
    let index = Index::new(store.clone(), &index_config());

    let total = index.append(&[record("a.txt")]).await.unwrap();
    assert_eq!(total, 1);

    let raw = std::fs::read_to_string(dir.path().join(INDEX_KEY)).unwrap();
    assert!(raw.starts_with("[\n  {"));
    assert!(raw.contains("\"courseId\": \"c1\""));

    let records = stored_records(&*store).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "a.txt");
    assert_eq!(records[0].uploaded_at, 1_700_000_000_000);
}

#[tokio::test]
async fn test_append_keeps_order_across_calls() {
    let (_dir, store) = local_store();
    let index = Index::new(store.clone(), &index_config());

    assert_eq!(index.append(&[record("one")]).await.unwrap(), 1);
    assert_eq!(
        index.append(&[record("two"), record("three")]).await.unwrap(),
        3
    );

    let names: Vec<String> = stored_records(&*store)
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["one", "two", "three"]);
}

#[tokio::test]
async fn test_append_preserves_unknown_entries() {
    let (_dir, store) = local_store();
    store
        .put(
            INDEX_KEY,
            Bytes::from(r#"[{"id":"legacy","blobUrl":{"href":"x"}}]"#),
            &PutOptions::new("application/json"),
        )
        .await
        .unwrap();
    let index = Index::new(store.clone(), &index_config());

    index.append(&[record("new.txt")]).await.unwrap();

    let document = index.read_json().await.unwrap();
    let entries = document.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], serde_json::json!({"id": "legacy", "blobUrl": {"href": "x"}}));
    assert_eq!(entries[1]["name"], "new.txt");
}

#[tokio::test]
async fn test_append_to_non_array_fails() {
    let (_dir, store) = local_store();
    store
        .put(
            INDEX_KEY,
            Bytes::from(r#"{"files":[]}"#),
            &PutOptions::new("application/json"),
        )
        .await
        .unwrap();
    let index = Index::new(store, &index_config());

    assert!(matches!(
        index.append(&[record("a.txt")]).await,
        Err(IndexError::NotAnArray)
    ));
}

// ============================================================================
// Conflicts
// ============================================================================

/// Every conditional write loses to some other writer.
#[derive(Default)]
struct AlwaysConflicting {
    attempts: AtomicU32,
}

#[async_trait]
impl ObjectStore for AlwaysConflicting {
    async fn put(
        &self,
        key: &str,
        _data: Bytes,
        _options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ObjectStoreError::PreconditionFailed(key.to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), ObjectStoreError> {
        Ok(())
    }

    fn supports_preconditions(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_append_gives_up_after_max_attempts() {
    let store = Arc::new(AlwaysConflicting::default());
    let index = Index::new(store.clone(), &index_config());

    let result = index.append(&[record("a.txt")]).await;

    assert!(matches!(result, Err(IndexError::Conflict(3))));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
}

/// Lets another writer sneak in an append right before our first write.
struct RacingStore {
    inner: LocalStore,
    raced: AtomicBool,
}

#[async_trait]
impl ObjectStore for RacingStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        if key == INDEX_KEY && !self.raced.swap(true, Ordering::SeqCst) {
            let competitor = serde_json::to_vec_pretty(&vec![record("competitor.txt")]).unwrap();
            self.inner
                .put(key, Bytes::from(competitor), &PutOptions::new("application/json"))
                .await?;
        }
        self.inner.put(key, data, options).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.inner.delete(key).await
    }

    fn supports_preconditions(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_append_retries_after_concurrent_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RacingStore {
        inner: LocalStore::new(dir.path(), PUBLIC_BASE).unwrap(),
        raced: AtomicBool::new(false),
    });
    let index = Index::new(store.clone(), &index_config());

    let total = index.append(&[record("mine.txt")]).await.unwrap();
    assert_eq!(total, 2);

    let names: Vec<String> = stored_records(&*store)
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["competitor.txt", "mine.txt"]);
}

/// A backend that cannot do conditional writes and refuses to pretend.
struct Unconditional {
    inner: LocalStore,
}

#[async_trait]
impl ObjectStore for Unconditional {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<PutResult, ObjectStoreError> {
        if options.precondition != Precondition::None {
            return Err(ObjectStoreError::Backend("no conditional writes".into()));
        }
        self.inner.put(key, data, options).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_append_without_precondition_support() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Unconditional {
        inner: LocalStore::new(dir.path(), PUBLIC_BASE).unwrap(),
    });
    let index = Index::new(store.clone(), &index_config());

    index.append(&[record("a.txt")]).await.unwrap();
    index.append(&[record("b.txt")]).await.unwrap();

    assert_eq!(stored_records(&*store).await.len(), 2);
}

// ============================================================================
// Writer task
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writer_applies_concurrent_appends() {
    let (_dir, store) = local_store();
    let (handle, _writer) = IndexHandle::spawn(Index::new(store.clone(), &index_config()));

    let mut tasks = Vec::new();
    for i in 0..20 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle.append(vec![record(&format!("file-{i}"))]).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(stored_records(&*store).await.len(), 20);
    assert_eq!(handle.read_json().await.unwrap().as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn test_writer_stops_when_handles_dropped() {
    let (_dir, store) = local_store();
    let (handle, writer) = IndexHandle::spawn(Index::new(store.clone(), &index_config()));

    handle.append(vec![record("last.txt")]).await.unwrap();
    drop(handle);

    writer.await.unwrap();
    assert_eq!(stored_records(&*store).await.len(), 1);
}
