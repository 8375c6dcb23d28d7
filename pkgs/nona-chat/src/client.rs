//! Chat client - composes session, connectivity, outbox and live views
//!
//! `ChatClient` owns the only state container of the process: the room list,
//! the selected room and its visible messages. Views read it through `watch`
//! receivers. Every send goes through [`ChatClient::send_message`], which
//! decides between delivering now and queueing in the outbox.

use crate::backend::Backend;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ChatError, Result};
use crate::messages::MessageStream;
use crate::outbox::{DrainReport, DurableQueue, Outbox, OutboxDraft};
use crate::presence::PresenceTracker;
use crate::rooms::RoomRegistry;
use crate::session::Session;
use crate::subscription::Subscription;
use crate::types::{Message, MessageKind, PendingMedia, QueuedMessage, Room};
use crate::ChatConfig;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What happened to a message handed to [`ChatClient::send_message`]
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Accepted by the remote store
    Sent(Message),
    /// Persisted in the outbox for delivery on reconnect
    Queued(QueuedMessage),
}

struct ChatState {
    rooms: watch::Sender<Vec<Room>>,
    current_room: watch::Sender<Option<Room>>,
    messages: Arc<watch::Sender<Vec<Message>>>,
}

impl ChatState {
    fn new() -> Self {
        Self {
            rooms: watch::channel(Vec::new()).0,
            current_room: watch::channel(None).0,
            messages: Arc::new(watch::channel(Vec::new()).0),
        }
    }
}

pub struct ChatClient {
    config: ChatConfig,
    session: Arc<Session>,
    connectivity: ConnectivityMonitor,
    outbox: Outbox,
    rooms: RoomRegistry,
    messages: Arc<MessageStream>,
    presence: PresenceTracker,
    state: Arc<ChatState>,
    room_feed: Mutex<Option<Subscription>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Build a client over `backend`, restoring any outbox entries in `queue`
    pub async fn new(
        backend: Backend,
        queue: Arc<dyn DurableQueue>,
        config: ChatConfig,
    ) -> Result<Arc<Self>> {
        let session = Arc::new(Session::new(backend.identity.clone(), config.clone()));
        let outbox = Outbox::open(queue).await?;
        let rooms = RoomRegistry::new(backend.documents.clone(), session.clone(), config.clone());
        let messages = Arc::new(MessageStream::new(
            backend.documents.clone(),
            backend.blobs.clone(),
            session.clone(),
            config.clone(),
        ));
        let presence = PresenceTracker::new(backend.documents, session.clone(), config.clone());

        Ok(Arc::new(Self {
            config,
            session,
            connectivity: ConnectivityMonitor::new(),
            outbox,
            rooms,
            messages,
            presence,
            state: Arc::new(ChatState::new()),
            room_feed: Mutex::new(None),
            reconnect: Mutex::new(None),
        }))
    }

    /// Subscribe to the room list and start draining the outbox on reconnect
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let state = self.state.clone();
        let subscription = self
            .rooms
            .subscribe(move |rooms| {
                state.rooms.send_replace(rooms);
            })
            .await?;
        if let Some(mut previous) = self.room_feed.lock().replace(subscription) {
            previous.cancel();
        }

        let listener = spawn_reconnect_listener(
            Arc::downgrade(self),
            self.connectivity.watch_reconnects(),
        );
        if let Some(previous) = self.reconnect.lock().replace(listener) {
            previous.abort();
        }

        info!(
            pending = self.outbox.pending_count(),
            "Chat client started"
        );
        Ok(())
    }

    /// Make `room` the active room and follow its messages
    ///
    /// The previous room's message feed is cancelled; the room list
    /// subscription is left untouched.
    #[instrument(skip(self, room), fields(room_id = %room.id))]
    pub async fn select_room(&self, room: Room) -> Result<()> {
        self.state.messages.send_replace(Vec::new());
        self.state.current_room.send_replace(Some(room.clone()));

        let sink = self.state.messages.clone();
        self.messages
            .subscribe(&room.id, move |visible| {
                sink.send_replace(visible);
            })
            .await?;
        info!("Selected room '{}'", room.name);
        Ok(())
    }

    /// Leave the active room view without touching membership
    pub fn clear_room(&self) {
        self.messages.unsubscribe();
        self.state.current_room.send_replace(None);
        self.state.messages.send_replace(Vec::new());
    }

    /// Send to the active room, or queue when offline
    #[instrument(skip(self, content, media))]
    pub async fn send_message(
        &self,
        content: &str,
        kind: MessageKind,
        media: Option<PendingMedia>,
    ) -> Result<SendOutcome> {
        let room = self
            .current_room()
            .ok_or_else(|| ChatError::validation("no room selected"))?;
        let user = self.session.require_user()?;
        let media = media.filter(|_| kind.requires_media());

        if self.connectivity.is_offline() {
            let entry = self
                .outbox
                .enqueue(OutboxDraft {
                    author_id: user.uid,
                    room_id: room.id,
                    content: content.to_string(),
                    kind,
                    media,
                })
                .await?;
            return Ok(SendOutcome::Queued(entry));
        }

        let upload = match &media {
            Some(pending) => Some(pending.load().await?),
            None => None,
        };
        match self.messages.send(&room.id, content, kind, upload).await {
            Ok(message) => Ok(SendOutcome::Sent(message)),
            Err(err @ ChatError::RemoteUnavailable(_)) if self.config.queue_on_send_failure => {
                warn!("Send failed ({}), queueing message instead", err);
                let entry = self
                    .outbox
                    .enqueue(OutboxDraft {
                        author_id: user.uid,
                        room_id: room.id,
                        content: content.to_string(),
                        kind,
                        media,
                    })
                    .await?;
                Ok(SendOutcome::Queued(entry))
            }
            Err(err) => Err(err),
        }
    }

    /// Publish our typing flag in the active room
    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        let room = self
            .current_room()
            .ok_or_else(|| ChatError::validation("no room selected"))?;
        self.presence.update(&room.id, is_typing).await
    }

    /// Deliver queued messages now
    #[instrument(skip(self))]
    pub async fn drain_outbox(&self) -> Result<DrainReport> {
        let report = self.outbox.drain(self.messages.as_ref()).await?;
        match &report {
            DrainReport::Completed { delivered } if *delivered > 0 => {
                info!(delivered, "Outbox delivered")
            }
            DrainReport::Halted { remaining, .. } => {
                warn!(remaining, "Outbox drain halted, will retry on next reconnect")
            }
            _ => {}
        }
        Ok(report)
    }

    /// Connectivity notification; an offline to online edge triggers a drain
    pub fn set_online(&self) -> bool {
        self.connectivity.set_online()
    }

    pub fn set_offline(&self) -> bool {
        self.connectivity.set_offline()
    }

    pub fn is_offline(&self) -> bool {
        self.connectivity.is_offline()
    }

    pub fn current_room(&self) -> Option<Room> {
        self.state.current_room.borrow().clone()
    }

    /// Latest room list, newest first
    pub fn room_list(&self) -> Vec<Room> {
        self.state.rooms.borrow().clone()
    }

    /// Visible messages of the active room
    pub fn visible_messages(&self) -> Vec<Message> {
        self.state.messages.borrow().clone()
    }

    pub fn watch_rooms(&self) -> watch::Receiver<Vec<Room>> {
        self.state.rooms.subscribe()
    }

    pub fn watch_current_room(&self) -> watch::Receiver<Option<Room>> {
        self.state.current_room.subscribe()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.state.messages.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn messages(&self) -> &MessageStream {
        &self.messages
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Cancel every live subscription and the reconnect listener
    pub fn shutdown(&self) {
        if let Some(listener) = self.reconnect.lock().take() {
            listener.abort();
        }
        if let Some(mut rooms) = self.room_feed.lock().take() {
            rooms.cancel();
        }
        self.messages.unsubscribe();
        debug!("Chat client shut down");
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(listener) = self.reconnect.get_mut().take() {
            listener.abort();
        }
    }
}

fn spawn_reconnect_listener(
    client: Weak<ChatClient>,
    mut reconnects: watch::Receiver<u64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = reconnects.borrow_and_update();
        while reconnects.changed().await.is_ok() {
            let count = *reconnects.borrow_and_update();
            let Some(client) = client.upgrade() else {
                break;
            };
            // Back offline already: the next transition bumps the counter again
            if client.is_offline() {
                continue;
            }
            debug!(reconnects = count, "Reconnected, draining outbox");
            if let Err(e) = client.drain_outbox().await {
                error!("Outbox drain after reconnect failed: {}", e);
            }
        }
        debug!("Reconnect listener stopped");
    })
}
