// Copyright 2024 Nona Team.
//
// Tests for the SQLite-backed outbox queue

use chrono::Utc;
use nona_chat::{
    ChatError, DrainReport, DurableQueue, MessageKind, Outbox, OutboxDraft, OutboxSender,
    QueuedMessage, OUTBOX_STORAGE_KEY,
};
use nona_store::{open_database, KeyValueStore, PersistentQueue, StoreConfig};
use std::sync::Arc;
use std::sync::Mutex;
use tempfile::NamedTempFile;

async fn create_test_db(path: &NamedTempFile) -> sea_orm::DatabaseConnection {
    open_database(&StoreConfig {
        db_path: path.path().to_path_buf(),
    })
    .await
    .expect("Failed to open database")
}

fn entry(content: &str) -> QueuedMessage {
    QueuedMessage {
        id: uuid::Uuid::new_v4().to_string(),
        author_id: "alice".to_string(),
        room_id: "r1".to_string(),
        content: content.to_string(),
        kind: MessageKind::Text,
        created_at: Utc::now(),
        media: None,
    }
}

fn contents(entries: &[QueuedMessage]) -> Vec<String> {
    entries.iter().map(|e| e.content.clone()).collect()
}

#[tokio::test]
async fn test_append_preserves_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let queue = PersistentQueue::new(create_test_db(&temp_file).await);

    for content in ["one", "two", "three"] {
        queue.append(entry(content)).await.unwrap();
    }

    let entries = queue.peek_all().await.unwrap();
    assert_eq!(contents(&entries), vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let queue = PersistentQueue::new(create_test_db(&temp_file).await);
        queue.append(entry("kept")).await.unwrap();
        queue.append(entry("also kept")).await.unwrap();
    }

    let queue: Arc<dyn DurableQueue> =
        Arc::new(PersistentQueue::new(create_test_db(&temp_file).await));
    let outbox = Outbox::open(queue).await.unwrap();

    assert_eq!(outbox.pending_count(), 2);
    let pending = outbox.list_pending().await.unwrap();
    assert_eq!(contents(&pending), vec!["kept", "also kept"]);
}

#[tokio::test]
async fn test_remove_through_and_clear() {
    let temp_file = NamedTempFile::new().unwrap();
    let queue = PersistentQueue::new(create_test_db(&temp_file).await);
    let first = entry("a");
    let second = entry("b");
    queue.append(first.clone()).await.unwrap();
    queue.append(second.clone()).await.unwrap();
    queue.append(entry("c")).await.unwrap();

    assert_eq!(queue.remove_through("unknown").await.unwrap(), 0);
    assert_eq!(queue.remove_through(&second.id).await.unwrap(), 2);
    assert_eq!(contents(&queue.peek_all().await.unwrap()), vec!["c"]);

    queue.clear().await.unwrap();
    assert!(queue.peek_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stored_as_json_array_under_outbox_key() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let queue = PersistentQueue::new(db.clone());
    queue.append(entry("hello")).await.unwrap();

    let raw = KeyValueStore::new(db)
        .get(OUTBOX_STORAGE_KEY)
        .await
        .unwrap()
        .expect("outbox key present");
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let items = value.as_array().expect("JSON array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["content"], "hello");
    assert_eq!(items[0]["roomId"], "r1");
    assert_eq!(items[0]["type"], "text");
}

#[tokio::test]
async fn test_reads_legacy_timestamp_shapes() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    let raw = r#"[
        {"id":"q1","authorId":"alice","roomId":"r1","content":"millis","type":"text","createdAt":1740823200000},
        {"id":"q2","authorId":"alice","roomId":"r1","content":"text","type":"text","createdAt":"2025-03-01T10:00:00Z"},
        {"id":"q3","authorId":"alice","roomId":"r1","content":"object","type":"text","createdAt":{"seconds":1740823200,"nanoseconds":0}}
    ]"#;
    KeyValueStore::new(db.clone())
        .set(OUTBOX_STORAGE_KEY, raw)
        .await
        .unwrap();

    let entries = PersistentQueue::new(db).peek_all().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .iter()
        .all(|e| e.created_at == entries[0].created_at));
}

#[tokio::test]
async fn test_corrupt_payload_is_reported() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = create_test_db(&temp_file).await;
    KeyValueStore::new(db.clone())
        .set(OUTBOX_STORAGE_KEY, "not json")
        .await
        .unwrap();

    let err = PersistentQueue::new(db).peek_all().await.unwrap_err();
    assert!(matches!(err, ChatError::Serialization(_)));
}

struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl OutboxSender for Recorder {
    async fn deliver(&self, entry: &QueuedMessage) -> nona_chat::Result<()> {
        self.seen.lock().unwrap().push(entry.content.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_outbox_drains_persistent_queue() {
    let temp_file = NamedTempFile::new().unwrap();
    let queue: Arc<dyn DurableQueue> =
        Arc::new(PersistentQueue::new(create_test_db(&temp_file).await));
    let outbox = Outbox::open(queue.clone()).await.unwrap();

    for content in ["a", "b"] {
        outbox
            .enqueue(OutboxDraft {
                author_id: "alice".to_string(),
                room_id: "r1".to_string(),
                content: content.to_string(),
                kind: MessageKind::Text,
                media: None,
            })
            .await
            .unwrap();
    }

    let recorder = Recorder {
        seen: Mutex::new(Vec::new()),
    };
    let report = outbox.drain(&recorder).await.unwrap();

    assert_eq!(report, DrainReport::Completed { delivered: 2 });
    assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "b"]);
    assert!(queue.peek_all().await.unwrap().is_empty());
}
