//! Nona Chat - offline-aware core of an anonymous group-chat client
//!
//! The hosted backend (identity, document store, blob store) is reached only
//! through the traits in [`backend`]; everything with its own invariants lives
//! here.
//!
//! # Architecture
//!
//! - **ConnectivityMonitor**: process-wide online/offline signal
//! - **Outbox**: durable FIFO of messages composed while offline, drained on reconnect
//! - **RoomRegistry**: live room list, public/ephemeral split, expiry labels
//! - **MessageStream**: single live view of the active room plus message mutations
//! - **PresenceTracker**: per-room typing and last-seen entries
//! - **Session**: anonymous sign-in and display name
//! - **ChatClient**: composes the above, decides send-now vs. queue
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use nona_chat::{Backend, ChatClient, ChatConfig, InMemoryBackend, MemoryQueue, MessageKind, RoomKind};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(InMemoryBackend::new());
//! let client = ChatClient::new(
//!     Backend::from_shared(backend),
//!     Arc::new(MemoryQueue::new()),
//!     ChatConfig::default(),
//! )
//! .await?;
//!
//! client.session().sign_in_as_guest().await?;
//! client.start().await?;
//!
//! let room = client.rooms().create("lobby", "", RoomKind::Ephemeral).await?;
//! client.select_room(room).await?;
//! client.send_message("hello", MessageKind::Text, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod connectivity;
pub mod error;
pub mod memory;
pub mod messages;
pub mod outbox;
pub mod presence;
pub mod rooms;
pub mod session;
pub mod subscription;
pub mod timestamp;
pub mod types;

pub use backend::{AuthFeed, Backend, BlobStore, DocumentStore, Feed, IdentityProvider};
pub use client::{ChatClient, SendOutcome};
pub use connectivity::ConnectivityMonitor;
pub use error::{ChatError, Result};
pub use memory::InMemoryBackend;
pub use messages::MessageStream;
pub use outbox::{DrainReport, DurableQueue, MemoryQueue, Outbox, OutboxDraft, OutboxSender};
pub use presence::PresenceTracker;
pub use rooms::{ExpiryLabel, RoomRegistry, RoomStatus};
pub use session::Session;
pub use subscription::Subscription;
pub use types::{
    MediaRef, MediaUpload, Message, MessageKind, MessagePatch, NewMessage, NewRoom,
    PendingMedia, PresenceEntry, QueuedMessage, Reaction, ReactionCount, Room, RoomKind,
    Timestamp, UserIdentity,
};

use std::time::Duration;

/// Key under which the offline outbox is persisted in local storage
pub const OUTBOX_STORAGE_KEY: &str = "offlineMessages";

/// Configuration for the chat core
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Validity window of an ephemeral room (default: 24h)
    pub ephemeral_room_ttl: chrono::Duration,

    /// Maximum room name length in characters (default: 50)
    pub max_room_name_chars: usize,

    /// Maximum room description length in characters (default: 200)
    pub max_room_description_chars: usize,

    /// Upper bound on any single call to the hosted backend (default: 15s)
    pub remote_timeout: Duration,

    /// Queue a message in the outbox when an online send fails (default: false)
    pub queue_on_send_failure: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ephemeral_room_ttl: chrono::Duration::hours(24),
            max_room_name_chars: 50,
            max_room_description_chars: 200,
            remote_timeout: Duration::from_secs(15),
            queue_on_send_failure: false,
        }
    }
}
