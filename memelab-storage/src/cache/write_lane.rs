//! Ordered background writer for detached persistent writes.
//!
//! Every persistent mutation issued by a cache running with detached writes
//! goes through one queue drained by one task, so the store sees them in call
//! order. Deletes wait for their reply, which also means every upsert queued
//! before them has landed.

use std::sync::Arc;

use memelab_core::{CacheKey, StorageError, ToolName};
use tokio::sync::{mpsc, oneshot};

use super::response_cache::{persist, CacheCounters};
use super::traits::{CacheRecord, PersistentStore, StorageResult};

pub(crate) enum WriteOp {
    Upsert(CacheRecord),
    Delete {
        key: CacheKey,
        reply: oneshot::Sender<StorageResult<u64>>,
    },
    DeleteTool {
        tool: ToolName,
        reply: oneshot::Sender<StorageResult<u64>>,
    },
}

/// Sending half of the writer queue.
#[derive(Clone)]
pub(crate) struct WriteLane {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteLane {
    /// Spawn the writer task on the current runtime.
    ///
    /// The task exits once every `WriteLane` clone is dropped and the queue
    /// is drained.
    pub(crate) fn spawn<S>(store: Arc<S>, counters: Arc<CacheCounters>) -> Self
    where
        S: PersistentStore,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(store, counters, rx));
        Self { tx }
    }

    /// Queue an upsert. False if the writer is gone.
    pub(crate) fn upsert(&self, record: CacheRecord) -> bool {
        self.tx.send(WriteOp::Upsert(record)).is_ok()
    }

    /// Delete one key after every write queued before it.
    pub(crate) async fn delete(&self, key: CacheKey) -> StorageResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.request(WriteOp::Delete { key, reply }, rx).await
    }

    /// Delete every row of `tool` after every write queued before it.
    pub(crate) async fn delete_tool(&self, tool: ToolName) -> StorageResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.request(WriteOp::DeleteTool { tool, reply }, rx).await
    }

    async fn request(
        &self,
        op: WriteOp,
        rx: oneshot::Receiver<StorageResult<u64>>,
    ) -> StorageResult<u64> {
        if self.tx.send(op).is_err() {
            return Err(writer_gone());
        }
        rx.await.unwrap_or_else(|_| Err(writer_gone()))
    }
}

fn writer_gone() -> StorageError {
    StorageError::Unavailable {
        reason: "persistent writer task stopped".to_string(),
    }
}

async fn drain<S>(
    store: Arc<S>,
    counters: Arc<CacheCounters>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) where
    S: PersistentStore,
{
    tracing::debug!(backend = store.backend_name(), "Persistent writer started");
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Upsert(record) => persist(store.as_ref(), &counters, &record).await,
            // The caller counts and logs delete failures.
            WriteOp::Delete { key, reply } => {
                let _ = reply.send(store.delete(&key).await);
            }
            WriteOp::DeleteTool { tool, reply } => {
                let _ = reply.send(store.delete_tool(&tool).await);
            }
        }
    }
    tracing::debug!("Persistent writer stopped");
}
