//! In-process backend implementing identity, document and blob stores
//!
//! Behaves like the hosted platform as far as the client can tell: the store
//! assigns ids and stamps timestamps from its own monotonic clock, every
//! change is pushed to live feeds as a full snapshot, and reachability can be
//! switched off to exercise the offline paths.

use crate::backend::{AuthFeed, BlobStore, DocumentStore, Feed, IdentityProvider};
use crate::error::{ChatError, Result};
use crate::types::{
    Message, MessagePatch, NewMessage, NewRoom, PresenceEntry, Room, Timestamp, UserIdentity,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

type Sender<T> = mpsc::UnboundedSender<T>;

struct State {
    user: Option<UserIdentity>,
    auth_watchers: Vec<Sender<Option<UserIdentity>>>,

    messages: Vec<Message>,
    rooms: Vec<Room>,
    presence: BTreeMap<String, PresenceEntry>,
    blobs: HashMap<String, Bytes>,

    message_feeds: Vec<(String, Sender<Vec<Message>>)>,
    room_feeds: Vec<Sender<Vec<Room>>>,
    presence_feeds: Vec<(String, Sender<Vec<PresenceEntry>>)>,

    clock: Option<Timestamp>,
    next_id: u64,
    available: bool,
    message_quota: Option<usize>,
}

impl State {
    /// Store clock: wall time, forced strictly increasing
    fn tick(&mut self) -> Timestamp {
        let mut now = Utc::now();
        if let Some(last) = self.clock {
            if now <= last {
                now = last + chrono::Duration::milliseconds(1);
            }
        }
        self.clock = Some(now);
        now
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(ChatError::remote("backend unreachable"))
        }
    }

    fn room_messages(&self, room_id: &str) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    fn room_presence(&self, room_id: &str) -> Vec<PresenceEntry> {
        self.presence
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect()
    }

    fn publish_messages(&mut self, room_id: &str) {
        let snapshot = self.room_messages(room_id);
        self.message_feeds.retain(|(room, tx)| {
            if room != room_id {
                return !tx.is_closed();
            }
            tx.unbounded_send(snapshot.clone()).is_ok()
        });
    }

    fn publish_rooms(&mut self) {
        let snapshot = self.rooms.clone();
        self.room_feeds
            .retain(|tx| tx.unbounded_send(snapshot.clone()).is_ok());
    }

    fn publish_presence(&mut self, room_id: &str) {
        let snapshot = self.room_presence(room_id);
        self.presence_feeds.retain(|(room, tx)| {
            if room != room_id {
                return !tx.is_closed();
            }
            tx.unbounded_send(snapshot.clone()).is_ok()
        });
    }

    fn publish_auth(&mut self) {
        let user = self.user.clone();
        self.auth_watchers
            .retain(|tx| tx.unbounded_send(user.clone()).is_ok());
    }
}

/// Hosted-platform stand-in
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                user: None,
                auth_watchers: Vec::new(),
                messages: Vec::new(),
                rooms: Vec::new(),
                presence: BTreeMap::new(),
                blobs: HashMap::new(),
                message_feeds: Vec::new(),
                room_feeds: Vec::new(),
                presence_feeds: Vec::new(),
                clock: None,
                next_id: 0,
                available: true,
                message_quota: None,
            }),
        }
    }

    /// Make every remote call fail with `RemoteUnavailable` (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
        debug!(available, "In-memory backend reachability changed");
    }

    /// Accept `count` more message creations, then fail them; `None` lifts the limit
    pub fn fail_messages_after(&self, count: Option<usize>) {
        self.state.lock().message_quota = count;
    }

    /// Every stored message of `room_id`, soft-deleted ones included, in insertion order
    pub fn stored_messages(&self, room_id: &str) -> Vec<Message> {
        self.state.lock().room_messages(room_id)
    }

    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.state
            .lock()
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
    }

    pub fn blob(&self, path: &str) -> Option<Bytes> {
        self.state.lock().blobs.get(path).cloned()
    }

    pub fn blob_paths(&self) -> Vec<String> {
        self.state.lock().blobs.keys().cloned().collect()
    }

    /// Number of open message feeds on `room_id`
    pub fn open_message_feeds(&self, room_id: &str) -> usize {
        self.state
            .lock()
            .message_feeds
            .iter()
            .filter(|(room, tx)| room == room_id && !tx.is_closed())
            .count()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryBackend {
    async fn sign_in_anonymous(&self) -> Result<UserIdentity> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let user = UserIdentity {
            uid: format!("anon-{}", uuid::Uuid::new_v4().simple()),
            display_name: None,
            is_anonymous: true,
        };
        state.user = Some(user.clone());
        state.publish_auth();
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.user = None;
        state.publish_auth();
        Ok(())
    }

    async fn update_display_name(&self, name: &str) -> Result<UserIdentity> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let user = state.user.as_mut().ok_or(ChatError::AuthenticationRequired)?;
        user.display_name = Some(name.to_string());
        let user = user.clone();
        state.publish_auth();
        Ok(user)
    }

    fn current_user(&self) -> Option<UserIdentity> {
        self.state.lock().user.clone()
    }

    fn on_auth_state_changed(&self) -> AuthFeed {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.state.lock();
        if tx.unbounded_send(state.user.clone()).is_ok() {
            state.auth_watchers.push(tx);
        }
        rx
    }
}

#[async_trait]
impl DocumentStore for InMemoryBackend {
    async fn create_message(&self, draft: NewMessage) -> Result<Message> {
        let mut state = self.state.lock();
        state.ensure_available()?;
        match state.message_quota {
            Some(0) => return Err(ChatError::remote("message write rejected")),
            Some(left) => state.message_quota = Some(left - 1),
            None => {}
        }

        let now = state.tick();
        let message = Message {
            id: state.next_id("msg"),
            author_id: draft.author_id,
            room_id: draft.room_id,
            content: draft.content,
            created_at: now,
            updated_at: now,
            is_edited: false,
            is_deleted: false,
            kind: draft.kind,
            media: draft.media,
            reactions: Vec::new(),
        };
        state.messages.push(message.clone());

        let room_id = message.room_id.clone();
        let mut room_changed = false;
        if let Some(room) = state.rooms.iter_mut().find(|r| r.id == room_id) {
            room.last_message = Some(Box::new(message.clone()));
            room_changed = true;
        }
        state.publish_messages(&room_id);
        if room_changed {
            state.publish_rooms();
        }
        Ok(message)
    }

    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let now = state.tick();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?;
        if patch.apply(message, now) {
            let room_id = message.room_id.clone();
            state.publish_messages(&room_id);
        }
        Ok(())
    }

    async fn subscribe_messages(&self, room_id: &str) -> Result<Feed<Message>> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let (tx, rx) = mpsc::unbounded();
        if tx.unbounded_send(state.room_messages(room_id)).is_ok() {
            state.message_feeds.push((room_id.to_string(), tx));
        }
        Ok(rx)
    }

    async fn create_room(&self, draft: NewRoom) -> Result<Room> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let room = Room {
            id: state.next_id("room"),
            name: draft.name,
            description: draft.description,
            kind: draft.kind,
            created_by: draft.created_by.clone(),
            created_at: draft.created_at,
            expires_at: draft.expires_at,
            member_count: 1,
            members: vec![draft.created_by],
            last_message: None,
            is_private: false,
        };
        state.rooms.push(room.clone());
        state.publish_rooms();
        Ok(room)
    }

    async fn set_membership(&self, room_id: &str, user_id: &str, joined: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let room = state
            .rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or_else(|| ChatError::NotFound(format!("room {}", room_id)))?;
        if room.set_member(user_id, joined) {
            state.publish_rooms();
        }
        Ok(())
    }

    async fn subscribe_rooms(&self) -> Result<Feed<Room>> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let (tx, rx) = mpsc::unbounded();
        if tx.unbounded_send(state.rooms.clone()).is_ok() {
            state.room_feeds.push(tx);
        }
        Ok(rx)
    }

    async fn upsert_presence(&self, user_id: &str, room_id: &str, is_typing: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let last_seen = state.tick();
        state.presence.insert(
            PresenceEntry::document_id(user_id, room_id),
            PresenceEntry {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                is_typing,
                last_seen,
            },
        );
        state.publish_presence(room_id);
        Ok(())
    }

    async fn subscribe_presence(&self, room_id: &str) -> Result<Feed<PresenceEntry>> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        let (tx, rx) = mpsc::unbounded();
        if tx.unbounded_send(state.room_presence(room_id)).is_ok() {
            state.presence_feeds.push((room_id.to_string(), tx));
        }
        Ok(rx)
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<String> {
        let mut state = self.state.lock();
        state.ensure_available()?;

        state.blobs.insert(path.to_string(), bytes);
        Ok(format!("memory://{}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;
    use futures::StreamExt;

    fn text(room: &str, content: &str) -> NewMessage {
        NewMessage {
            author_id: "alice".to_string(),
            room_id: room.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            media: None,
        }
    }

    #[tokio::test]
    async fn test_store_clock_is_strictly_increasing() {
        let backend = InMemoryBackend::new();
        let mut last = None;
        for i in 0..20 {
            let message = backend.create_message(text("r1", &i.to_string())).await.unwrap();
            if let Some(previous) = last {
                assert!(message.created_at > previous);
            }
            last = Some(message.created_at);
        }
    }

    #[tokio::test]
    async fn test_feed_starts_with_snapshot_and_follows_changes() {
        let backend = InMemoryBackend::new();
        backend.create_message(text("r1", "first")).await.unwrap();
        backend.create_message(text("r2", "elsewhere")).await.unwrap();

        let mut feed = backend.subscribe_messages("r1").await.unwrap();
        let initial = feed.next().await.unwrap();
        assert_eq!(initial.len(), 1);

        let second = backend.create_message(text("r1", "second")).await.unwrap();
        assert_eq!(feed.next().await.unwrap().len(), 2);

        backend
            .update_message(&second.id, MessagePatch::SoftDelete)
            .await
            .unwrap();
        let after_delete = feed.next().await.unwrap();
        assert_eq!(after_delete.len(), 2);
        assert!(after_delete.iter().any(|m| m.is_deleted));
    }

    #[tokio::test]
    async fn test_closed_feeds_are_pruned() {
        let backend = InMemoryBackend::new();
        let feed = backend.subscribe_messages("r1").await.unwrap();
        assert_eq!(backend.open_message_feeds("r1"), 1);

        drop(feed);
        backend.create_message(text("r1", "ping")).await.unwrap();
        assert_eq!(backend.open_message_feeds("r1"), 0);
        assert!(backend.state.lock().message_feeds.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_backend_rejects_calls() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);

        let err = backend.create_message(text("r1", "x")).await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteUnavailable(_)));
        assert!(backend.upload("media/a", Bytes::from_static(b"a")).await.is_err());
        assert!(backend.sign_in_anonymous().await.is_err());

        backend.set_available(true);
        assert!(backend.create_message(text("r1", "x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_message_quota() {
        let backend = InMemoryBackend::new();
        backend.fail_messages_after(Some(2));

        assert!(backend.create_message(text("r1", "a")).await.is_ok());
        assert!(backend.create_message(text("r1", "b")).await.is_ok());
        assert!(backend.create_message(text("r1", "c")).await.is_err());

        backend.fail_messages_after(None);
        assert!(backend.create_message(text("r1", "c")).await.is_ok());
        assert_eq!(backend.stored_messages("r1").len(), 3);
    }

    #[tokio::test]
    async fn test_update_unknown_message() {
        let backend = InMemoryBackend::new();
        let err = backend
            .update_message("nope", MessagePatch::SoftDelete)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_auth_feed_reports_transitions() {
        let backend = InMemoryBackend::new();
        let mut auth = backend.on_auth_state_changed();
        assert_eq!(auth.next().await.unwrap(), None);

        let user = backend.sign_in_anonymous().await.unwrap();
        assert_eq!(auth.next().await.unwrap().unwrap().uid, user.uid);

        backend.update_display_name("Quiet Fox").await.unwrap();
        let renamed = auth.next().await.unwrap().unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("Quiet Fox"));

        backend.sign_out().await.unwrap();
        assert_eq!(auth.next().await.unwrap(), None);
        assert!(backend.current_user().is_none());
    }

    #[tokio::test]
    async fn test_new_message_becomes_last_message_of_room() {
        let backend = InMemoryBackend::new();
        let room = backend
            .create_room(NewRoom {
                name: "lobby".to_string(),
                description: None,
                kind: crate::types::RoomKind::Public,
                created_by: "alice".to_string(),
                created_at: Utc::now(),
                expires_at: None,
            })
            .await
            .unwrap();
        assert_eq!(room.members, vec!["alice".to_string()]);

        backend.create_message(text(&room.id, "hi")).await.unwrap();
        let stored = backend.room(&room.id).unwrap();
        assert_eq!(stored.last_message.unwrap().content, "hi");
    }
}
