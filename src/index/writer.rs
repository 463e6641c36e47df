use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{FileRecord, Index, IndexError};

/// Appends waiting for the writer before callers start to block.
const QUEUE_DEPTH: usize = 64;

struct AppendRequest {
    records: Vec<FileRecord>,
    reply: oneshot::Sender<Result<usize, IndexError>>,
}

/// Cloneable handle to the index.
///
/// All appends are applied by a single background task in the order they
/// were queued; reads bypass it.
#[derive(Clone)]
pub struct IndexHandle {
    index: Arc<Index>,
    tx: mpsc::Sender<AppendRequest>,
}

impl IndexHandle {
    /// Start the writer task. It stops once every handle has been dropped and
    /// the queue is drained.
    pub fn spawn(index: Index) -> (Self, JoinHandle<()>) {
        let index = Arc::new(index);
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run(Arc::clone(&index), rx));
        (Self { index, tx }, task)
    }

    /// Queue records for appending and wait until they are persisted.
    pub async fn append(&self, records: Vec<FileRecord>) -> Result<usize, IndexError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(AppendRequest { records, reply })
            .await
            .map_err(|_| IndexError::WriterClosed)?;
        response.await.map_err(|_| IndexError::WriterClosed)?
    }

    pub async fn read_json(&self) -> Result<Value, IndexError> {
        self.index.read_json().await
    }

    pub fn key(&self) -> &str {
        self.index.key()
    }
}

async fn run(index: Arc<Index>, mut rx: mpsc::Receiver<AppendRequest>) {
    while let Some(request) = rx.recv().await {
        let count = request.records.len();
        let result = index.append(&request.records).await;
        match &result {
            Ok(total) => {
                tracing::debug!(key = %index.key(), appended = count, total, "Index updated")
            }
            Err(e) => {
                tracing::error!(key = %index.key(), appended = count, error = %e, "Index update failed")
            }
        }
        // The caller may have gone away; the append stands regardless
        let _ = request.reply.send(result);
    }
    tracing::debug!(key = %index.key(), "Index writer stopped");
}
