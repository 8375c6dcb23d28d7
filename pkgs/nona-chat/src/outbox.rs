//! Offline outbox - durable FIFO of messages composed while disconnected
//!
//! Entries are persisted before `enqueue` returns and leave the queue only
//! after the remote store accepted them. A drain walks the queue front to
//! back and stops at the first failure, so delivery order always matches
//! composition order and a failing entry is retried on the next drain.

use crate::error::{ChatError, Result};
use crate::types::{MessageKind, PendingMedia, QueuedMessage};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Ordered durable storage behind the outbox
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append at the tail; must be durable when this returns
    async fn append(&self, entry: QueuedMessage) -> Result<()>;

    /// All entries, front first
    async fn peek_all(&self) -> Result<Vec<QueuedMessage>>;

    /// Remove entries from the front up to and including `id`.
    /// Returns the number removed, 0 if `id` is not queued.
    async fn remove_through(&self, id: &str) -> Result<usize>;

    async fn clear(&self) -> Result<()>;
}

/// Volatile queue for tests and sessions without local storage
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<QueuedMessage>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn append(&self, entry: QueuedMessage) -> Result<()> {
        self.entries.lock().push_back(entry);
        Ok(())
    }

    async fn peek_all(&self) -> Result<Vec<QueuedMessage>> {
        Ok(self.entries.lock().iter().cloned().collect())
    }

    async fn remove_through(&self, id: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.id == id) {
            Some(index) => {
                entries.drain(..=index);
                Ok(index + 1)
            }
            None => Ok(0),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Remote delivery used by the drain
#[async_trait]
pub trait OutboxSender: Send + Sync {
    async fn deliver(&self, entry: &QueuedMessage) -> Result<()>;
}

/// Message handed to the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxDraft {
    pub author_id: String,
    pub room_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub media: Option<PendingMedia>,
}

impl OutboxDraft {
    fn validate(&self) -> Result<()> {
        if self.author_id.is_empty() {
            return Err(ChatError::validation("queued message has no author"));
        }
        if self.room_id.is_empty() {
            return Err(ChatError::validation("queued message has no room"));
        }
        if self.kind.requires_media() {
            if self.media.is_none() {
                return Err(ChatError::validation(format!(
                    "{:?} message requires an attachment",
                    self.kind
                )));
            }
        } else if self.content.trim().is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }
        Ok(())
    }
}

/// Outcome of one drain call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReport {
    /// Another drain was in flight; nothing was touched
    AlreadyRunning,
    /// Every entry present when the drain started was delivered
    Completed { delivered: usize },
    /// Delivery failed; the failing entry and everything after it stay queued
    Halted {
        delivered: usize,
        remaining: usize,
        reason: String,
    },
    /// The outbox was cleared mid-drain; nothing after the purge was sent
    Cleared { delivered: usize },
}

/// Offline outbox
pub struct Outbox {
    queue: Arc<dyn DurableQueue>,
    write_lock: tokio::sync::Mutex<()>,
    draining: AtomicBool,
    generation: AtomicU64,
    pending: watch::Sender<usize>,
}

impl Outbox {
    /// Open the outbox over `queue`, picking up entries left by a previous run
    pub async fn open(queue: Arc<dyn DurableQueue>) -> Result<Self> {
        let existing = queue.peek_all().await?.len();
        if existing > 0 {
            info!("Outbox opened with {} pending messages", existing);
        }
        let (pending, _) = watch::channel(existing);

        Ok(Self {
            queue,
            write_lock: tokio::sync::Mutex::new(()),
            draining: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            pending,
        })
    }

    /// Persist a message for later delivery
    pub async fn enqueue(&self, draft: OutboxDraft) -> Result<QueuedMessage> {
        draft.validate()?;

        let entry = QueuedMessage {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: draft.author_id,
            room_id: draft.room_id,
            content: draft.content.trim().to_string(),
            kind: draft.kind,
            created_at: Utc::now(),
            media: draft.media,
        };

        {
            let _guard = self.write_lock.lock().await;
            self.queue.append(entry.clone()).await?;
            self.pending.send_modify(|count| *count += 1);
        }

        info!(
            message_id = %entry.id,
            room_id = %entry.room_id,
            pending = self.pending_count(),
            "Queued message for delivery on reconnect"
        );
        Ok(entry)
    }

    /// Deliver queued messages in order, stopping at the first failure
    pub async fn drain(&self, sender: &dyn OutboxSender) -> Result<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress");
            return Ok(DrainReport::AlreadyRunning);
        }
        let _running = DrainFlag(&self.draining);

        let (snapshot, generation) = {
            let _guard = self.write_lock.lock().await;
            (
                self.queue.peek_all().await?,
                self.generation.load(Ordering::Acquire),
            )
        };
        if snapshot.is_empty() {
            return Ok(DrainReport::Completed { delivered: 0 });
        }
        info!("Draining {} queued messages", snapshot.len());

        let mut delivered = 0;
        for entry in &snapshot {
            if self.was_cleared(generation).await {
                info!(delivered, "Outbox cleared during drain, stopping");
                return Ok(DrainReport::Cleared { delivered });
            }
            if let Err(err) = sender.deliver(entry).await {
                let remaining = self.pending_count();
                warn!(
                    message_id = %entry.id,
                    delivered,
                    remaining,
                    "Drain halted: {}",
                    err
                );
                return Ok(DrainReport::Halted {
                    delivered,
                    remaining,
                    reason: err.to_string(),
                });
            }

            let _guard = self.write_lock.lock().await;
            let removed = self.queue.remove_through(&entry.id).await?;
            self.pending
                .send_modify(|count| *count = count.saturating_sub(removed));
            delivered += 1;
            debug!("Delivered queued message {}", entry.id);
        }

        info!("Outbox drained, {} messages delivered", delivered);
        Ok(DrainReport::Completed { delivered })
    }

    async fn was_cleared(&self, generation: u64) -> bool {
        let _guard = self.write_lock.lock().await;
        self.generation.load(Ordering::Acquire) != generation
    }

    /// Queued messages, oldest first
    pub async fn list_pending(&self) -> Result<Vec<QueuedMessage>> {
        let _guard = self.write_lock.lock().await;
        self.queue.peek_all().await
    }

    /// Drop every queued message
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.queue.clear().await?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let dropped = self.pending.send_replace(0);
        info!("Outbox cleared, {} messages discarded", dropped);
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Observe the pending-count badge
    pub fn watch_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

struct DrainFlag<'a>(&'a AtomicBool);

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sender that fails on the n-th call (1-based) and records what it delivered
    struct ScriptedSender {
        fail_on: Option<usize>,
        calls: Mutex<usize>,
        delivered: Mutex<Vec<String>>,
    }

    impl ScriptedSender {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                fail_on,
                calls: Mutex::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OutboxSender for ScriptedSender {
        async fn deliver(&self, entry: &QueuedMessage) -> Result<()> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if Some(call) == self.fail_on {
                return Err(ChatError::remote("backend unreachable"));
            }
            self.delivered.lock().push(entry.content.clone());
            Ok(())
        }
    }

    fn draft(content: &str) -> OutboxDraft {
        OutboxDraft {
            author_id: "alice".to_string(),
            room_id: "r1".to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            media: None,
        }
    }

    async fn outbox_with(contents: &[&str]) -> Outbox {
        let outbox = Outbox::open(Arc::new(MemoryQueue::new())).await.unwrap();
        for content in contents {
            outbox.enqueue(draft(content)).await.unwrap();
        }
        outbox
    }

    fn contents(entries: &[QueuedMessage]) -> Vec<String> {
        entries.iter().map(|e| e.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_list_pending_preserves_enqueue_order() {
        let outbox = outbox_with(&["one", "two", "three", "four"]).await;

        let pending = outbox.list_pending().await.unwrap();
        assert_eq!(contents(&pending), vec!["one", "two", "three", "four"]);
        assert_eq!(outbox.pending_count(), 4);
    }

    #[tokio::test]
    async fn test_full_drain_empties_outbox() {
        let outbox = outbox_with(&["a", "b", "c"]).await;
        let sender = ScriptedSender::new(None);

        let report = outbox.drain(&sender).await.unwrap();

        assert_eq!(report, DrainReport::Completed { delivered: 3 });
        assert_eq!(*sender.delivered.lock(), vec!["a", "b", "c"]);
        assert!(outbox.list_pending().await.unwrap().is_empty());
        assert_eq!(outbox.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_failure() {
        for fail_on in 1..=4 {
            let outbox = outbox_with(&["a", "b", "c", "d"]).await;
            let sender = ScriptedSender::new(Some(fail_on));

            let report = outbox.drain(&sender).await.unwrap();

            let expected_left: Vec<&str> = ["a", "b", "c", "d"][fail_on - 1..].to_vec();
            match report {
                DrainReport::Halted {
                    delivered,
                    remaining,
                    ..
                } => {
                    assert_eq!(delivered, fail_on - 1);
                    assert_eq!(remaining, expected_left.len());
                }
                other => panic!("unexpected report {:?}", other),
            }
            let pending = outbox.list_pending().await.unwrap();
            assert_eq!(contents(&pending), expected_left);
            assert_eq!(outbox.pending_count(), expected_left.len());
        }
    }

    #[tokio::test]
    async fn test_failed_entry_is_retried_on_next_drain() {
        let outbox = outbox_with(&["a", "b"]).await;

        outbox.drain(&ScriptedSender::new(Some(1))).await.unwrap();
        assert_eq!(outbox.pending_count(), 2);

        let report = outbox.drain(&ScriptedSender::new(None)).await.unwrap();
        assert_eq!(report, DrainReport::Completed { delivered: 2 });
        assert_eq!(outbox.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_persisting() {
        let outbox = outbox_with(&[]).await;

        let err = outbox.enqueue(draft("   ")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let mut image = draft("");
        image.kind = MessageKind::Image;
        let err = outbox.enqueue(image).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        assert_eq!(outbox.pending_count(), 0);
        assert!(outbox.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_count() {
        let outbox = outbox_with(&["a", "b"]).await;
        let mut badge = outbox.watch_pending();
        assert_eq!(*badge.borrow_and_update(), 2);

        outbox.clear().await.unwrap();

        assert!(badge.has_changed().unwrap());
        assert_eq!(*badge.borrow_and_update(), 0);
        assert!(outbox.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_restores_pending_count() {
        let queue: Arc<dyn DurableQueue> = Arc::new(MemoryQueue::new());
        {
            let outbox = Outbox::open(queue.clone()).await.unwrap();
            outbox.enqueue(draft("kept")).await.unwrap();
        }

        let reopened = Outbox::open(queue).await.unwrap();
        assert_eq!(reopened.pending_count(), 1);
    }

    struct SlowSender;

    #[async_trait]
    impl OutboxSender for SlowSender {
        async fn deliver(&self, _entry: &QueuedMessage) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_single_flight() {
        let outbox = Arc::new(outbox_with(&["a", "b"]).await);

        let running = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.drain(&SlowSender).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(outbox.is_draining());

        let second = outbox.drain(&SlowSender).await.unwrap();
        assert_eq!(second, DrainReport::AlreadyRunning);

        let first = running.await.unwrap().unwrap();
        assert_eq!(first, DrainReport::Completed { delivered: 2 });
        assert!(!outbox.is_draining());
    }

    #[tokio::test]
    async fn test_enqueue_during_drain_lands_after_tail() {
        let outbox = Arc::new(outbox_with(&["a", "b"]).await);

        let running = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.drain(&SlowSender).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        outbox.enqueue(draft("late")).await.unwrap();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report, DrainReport::Completed { delivered: 2 });

        let pending = outbox.list_pending().await.unwrap();
        assert_eq!(contents(&pending), vec!["late"]);
        assert_eq!(outbox.pending_count(), 1);
    }

    /// Slow sender that records what reached the remote
    #[derive(Default)]
    struct RecordingSlowSender {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutboxSender for RecordingSlowSender {
        async fn deliver(&self, entry: &QueuedMessage) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            self.delivered.lock().push(entry.content.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_clear_during_drain_stops_delivery() {
        let outbox = Arc::new(outbox_with(&["a", "b", "c", "d"]).await);
        let sender = Arc::new(RecordingSlowSender::default());

        let running = {
            let outbox = outbox.clone();
            let sender = sender.clone();
            tokio::spawn(async move { outbox.drain(sender.as_ref()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        outbox.clear().await.unwrap();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report, DrainReport::Cleared { delivered: 1 });
        assert_eq!(*sender.delivered.lock(), vec!["a"]);
        assert_eq!(outbox.pending_count(), 0);
        assert!(outbox.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_queue_remove_through() {
        let queue = MemoryQueue::new();
        for id in ["q1", "q2", "q3"] {
            queue
                .append(QueuedMessage {
                    id: id.to_string(),
                    author_id: "alice".to_string(),
                    room_id: "r1".to_string(),
                    content: id.to_string(),
                    kind: MessageKind::Text,
                    created_at: Utc::now(),
                    media: None,
                })
                .await
                .unwrap();
        }

        assert_eq!(queue.remove_through("missing").await.unwrap(), 0);
        assert_eq!(queue.remove_through("q2").await.unwrap(), 2);
        let left = queue.peek_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "q3");
    }
}
