//! Contracts of the hosted backend collaborators
//!
//! The client never talks to the hosted platform directly; it goes through
//! these three traits. [`crate::memory::InMemoryBackend`] implements all of
//! them in-process.

use crate::error::{ChatError, Result};
use crate::types::{Message, MessagePatch, NewMessage, NewRoom, PresenceEntry, Room, UserIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Live query feed: every item is the full result set after one change batch
pub type Feed<T> = mpsc::UnboundedReceiver<Vec<T>>;

/// Auth state changes; `None` means signed out
pub type AuthFeed = mpsc::UnboundedReceiver<Option<UserIdentity>>;

/// Anonymous identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_anonymous(&self) -> Result<UserIdentity>;

    async fn sign_out(&self) -> Result<()>;

    async fn update_display_name(&self, name: &str) -> Result<UserIdentity>;

    fn current_user(&self) -> Option<UserIdentity>;

    /// Feed of auth state changes, starting with the current state
    fn on_auth_state_changed(&self) -> AuthFeed;
}

/// Document database holding the `messages`, `rooms` and `presence` collections
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a message; the store assigns the id and stamps both timestamps
    async fn create_message(&self, draft: NewMessage) -> Result<Message>;

    /// Apply a patch to a message; `NotFound` if the id does not exist
    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<()>;

    /// Every message record of `room_id`, soft-deleted ones included
    async fn subscribe_messages(&self, room_id: &str) -> Result<Feed<Message>>;

    async fn create_room(&self, draft: NewRoom) -> Result<Room>;

    /// Idempotent membership update
    async fn set_membership(&self, room_id: &str, user_id: &str, joined: bool) -> Result<()>;

    async fn subscribe_rooms(&self) -> Result<Feed<Room>>;

    /// Upsert the `(user_id, room_id)` presence entry; the store stamps `last_seen`
    async fn upsert_presence(&self, user_id: &str, room_id: &str, is_typing: bool) -> Result<()>;

    async fn subscribe_presence(&self, room_id: &str) -> Result<Feed<PresenceEntry>>;
}

/// Object storage for message media
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return a download url
    async fn upload(&self, path: &str, bytes: Bytes) -> Result<String>;
}

/// The three collaborators bundled together
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityProvider>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backend {
    /// Use one value implementing all three traits
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: IdentityProvider + DocumentStore + BlobStore + 'static,
    {
        Self {
            identity: backend.clone(),
            documents: backend.clone(),
            blobs: backend,
        }
    }
}

/// Bound a remote call; an elapsed deadline is reported as `RemoteUnavailable`
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::remote(format!(
            "{} timed out after {:?}",
            operation, limit
        ))),
    }
}
