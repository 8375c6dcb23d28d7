//! Persistent outbox queue
//!
//! The whole queue is one JSON array stored under a single key, rewritten on
//! every change. Read-modify-write cycles are serialised by a mutex so
//! concurrent appends never lose entries.

use async_trait::async_trait;
use nona_chat::{ChatError, DurableQueue, QueuedMessage, Result, OUTBOX_STORAGE_KEY};
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::kv_store::KeyValueStore;

fn storage_error(err: DbErr) -> ChatError {
    ChatError::Storage(err.to_string())
}

/// [`DurableQueue`] backed by the local SQLite store
pub struct PersistentQueue {
    store: KeyValueStore,
    key: String,
    lock: Mutex<()>,
}

impl PersistentQueue {
    /// Queue stored under the default outbox key
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_key(db, OUTBOX_STORAGE_KEY)
    }

    pub fn with_key(db: DatabaseConnection, key: impl Into<String>) -> Self {
        Self {
            store: KeyValueStore::new(db),
            key: key.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<QueuedMessage>> {
        let Some(raw) = self.store.get(&self.key).await.map_err(storage_error)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|e| {
            error!("Stored outbox under '{}' is unreadable: {}", self.key, e);
            ChatError::from(e)
        })
    }

    async fn save(&self, entries: &[QueuedMessage]) -> Result<()> {
        let raw = serde_json::to_string(entries)?;
        self.store
            .set(&self.key, &raw)
            .await
            .map_err(storage_error)
    }
}

#[async_trait]
impl DurableQueue for PersistentQueue {
    async fn append(&self, entry: QueuedMessage) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.push(entry);
        self.save(&entries).await?;
        debug!("Outbox persisted with {} entries", entries.len());
        Ok(())
    }

    async fn peek_all(&self) -> Result<Vec<QueuedMessage>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn remove_through(&self, id: &str) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Ok(0);
        };
        entries.drain(..=index);
        self.save(&entries).await?;
        Ok(index + 1)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.delete(&self.key).await.map_err(storage_error)?;
        Ok(())
    }
}
