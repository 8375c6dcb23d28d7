//! Message stream - live view of the active room and message mutations

use crate::backend::{bounded, BlobStore, DocumentStore};
use crate::error::{ChatError, Result};
use crate::outbox::OutboxSender;
use crate::session::Session;
use crate::subscription::Subscription;
use crate::types::{MediaRef, MediaUpload, Message, MessageKind, MessagePatch, NewMessage, QueuedMessage};
use crate::ChatConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Visible messages of `room_id` in authoritative creation order
pub fn project(room_id: &str, batch: Vec<Message>) -> Vec<Message> {
    let mut visible: Vec<Message> = batch
        .into_iter()
        .filter(|m| m.is_visible_in(room_id))
        .collect();
    visible.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    visible
}

/// Storage path of an uploaded attachment
pub fn media_path(room_id: &str, file_name: &str) -> String {
    format!("media/{}/{}_{}", room_id, uuid::Uuid::new_v4(), file_name)
}

struct ActiveFeed {
    room_id: String,
    subscription: Subscription,
}

/// Live message view, one room at a time
pub struct MessageStream {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    session: Arc<Session>,
    config: ChatConfig,
    active: Mutex<Option<ActiveFeed>>,
}

impl MessageStream {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        session: Arc<Session>,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            session,
            config,
            active: Mutex::new(None),
        }
    }

    /// Follow `room_id`, replacing any previous subscription
    ///
    /// The previous room's feed is cancelled before the new one is set up,
    /// so no batch of the old room reaches `on_messages` afterwards.
    pub async fn subscribe<F>(&self, room_id: &str, mut on_messages: F) -> Result<()>
    where
        F: FnMut(Vec<Message>) + Send + 'static,
    {
        self.unsubscribe();

        let feed = bounded(
            self.config.remote_timeout,
            "message subscription",
            self.store.subscribe_messages(room_id),
        )
        .await?;

        let room = room_id.to_string();
        let subscription = Subscription::spawn(format!("messages:{}", room_id), feed, move |batch| {
            on_messages(project(&room, batch));
        });

        let replaced = self.active.lock().replace(ActiveFeed {
            room_id: room_id.to_string(),
            subscription,
        });
        if let Some(mut stale) = replaced {
            stale.subscription.cancel();
        }
        debug!("Subscribed to messages of room {}", room_id);
        Ok(())
    }

    /// Cancel the active subscription; returns whether one was active
    pub fn unsubscribe(&self) -> bool {
        let previous = self.active.lock().take();
        match previous {
            Some(mut feed) => {
                feed.subscription.cancel();
                debug!("Unsubscribed from messages of room {}", feed.room_id);
                true
            }
            None => false,
        }
    }

    pub fn active_room(&self) -> Option<String> {
        self.active.lock().as_ref().map(|f| f.room_id.clone())
    }

    /// Send as the signed-in user; media is uploaded before the record is created
    #[instrument(skip(self, content, media))]
    pub async fn send(
        &self,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        media: Option<MediaUpload>,
    ) -> Result<Message> {
        let user = self.session.require_user()?;
        self.send_as(&user.uid, room_id, content, kind, media).await
    }

    async fn send_as(
        &self,
        author_id: &str,
        room_id: &str,
        content: &str,
        kind: MessageKind,
        media: Option<MediaUpload>,
    ) -> Result<Message> {
        let content = content.trim();
        if room_id.is_empty() {
            return Err(ChatError::validation("no room selected"));
        }
        if kind.requires_media() {
            if media.is_none() {
                return Err(ChatError::validation(format!(
                    "{:?} message requires an attachment",
                    kind
                )));
            }
        } else if content.is_empty() {
            return Err(ChatError::validation("message content is empty"));
        }

        let media = match media.filter(|_| kind.requires_media()) {
            Some(upload) => Some(self.upload(room_id, upload).await?),
            None => None,
        };

        let message = bounded(
            self.config.remote_timeout,
            "message creation",
            self.store.create_message(NewMessage {
                author_id: author_id.to_string(),
                room_id: room_id.to_string(),
                content: content.to_string(),
                kind,
                media,
            }),
        )
        .await
        .map_err(|e| {
            warn!("Failed to send message to room {}: {}", room_id, e);
            e
        })?;

        debug!("Sent message {} to room {}", message.id, room_id);
        Ok(message)
    }

    async fn upload(&self, room_id: &str, upload: MediaUpload) -> Result<MediaRef> {
        let path = media_path(room_id, &upload.file_name);
        let file_size = upload.bytes.len() as u64;

        let url = bounded(
            self.config.remote_timeout,
            "media upload",
            self.blobs.upload(&path, upload.bytes),
        )
        .await
        .map_err(|e| {
            warn!("Upload of {} failed: {}", upload.file_name, e);
            e
        })?;

        info!(path = %path, file_size, "Uploaded media");
        Ok(MediaRef {
            url,
            file_name: upload.file_name,
            file_size,
        })
    }

    /// Replace the content of a message and mark it edited
    pub async fn edit(&self, message_id: &str, new_content: &str) -> Result<()> {
        let content = new_content.trim();
        if content.is_empty() {
            return Err(ChatError::validation("edited content is empty"));
        }
        self.patch(
            message_id,
            MessagePatch::Edit {
                content: content.to_string(),
            },
        )
        .await
    }

    /// Hide a message from every live view; the record is kept
    pub async fn soft_delete(&self, message_id: &str) -> Result<()> {
        self.patch(message_id, MessagePatch::SoftDelete).await
    }

    /// React with `emoji`; reacting twice with the same emoji is a no-op
    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<()> {
        let user = self.session.require_user()?;
        self.patch(
            message_id,
            MessagePatch::AddReaction {
                emoji: emoji.to_string(),
                user_id: user.uid,
            },
        )
        .await
    }

    /// Withdraw a reaction; a missing reaction is a no-op
    pub async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<()> {
        let user = self.session.require_user()?;
        self.patch(
            message_id,
            MessagePatch::RemoveReaction {
                emoji: emoji.to_string(),
                user_id: user.uid,
            },
        )
        .await
    }

    async fn patch(&self, message_id: &str, patch: MessagePatch) -> Result<()> {
        self.session.require_user()?;
        if let MessagePatch::AddReaction { emoji, .. } | MessagePatch::RemoveReaction { emoji, .. } =
            &patch
        {
            if emoji.trim().is_empty() {
                return Err(ChatError::validation("emoji is empty"));
            }
        }

        bounded(
            self.config.remote_timeout,
            "message update",
            self.store.update_message(message_id, patch),
        )
        .await
        .map_err(|e| {
            warn!("Failed to update message {}: {}", message_id, e);
            e
        })
    }
}

#[async_trait]
impl OutboxSender for MessageStream {
    async fn deliver(&self, entry: &QueuedMessage) -> Result<()> {
        self.session.require_user()?;

        let media = match &entry.media {
            Some(pending) => Some(pending.load().await?),
            None => None,
        };
        self.send_as(&entry.author_id, &entry.room_id, &entry.content, entry.kind, media)
            .await?;
        Ok(())
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, room: &str, second: u32, deleted: bool) -> Message {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, second).unwrap();
        Message {
            id: id.to_string(),
            author_id: "alice".to_string(),
            room_id: room.to_string(),
            content: id.to_string(),
            created_at: at,
            updated_at: at,
            is_edited: false,
            is_deleted: deleted,
            kind: MessageKind::Text,
            media: None,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn test_project_filters_and_orders() {
        let batch = vec![
            msg("c", "r1", 30, false),
            msg("a", "r1", 10, false),
            msg("gone", "r1", 20, true),
            msg("other", "r2", 5, false),
            msg("b", "r1", 10, false),
        ];

        let ids: Vec<String> = project("r1", batch).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_media_path_layout() {
        let path = media_path("r1", "cat.png");
        assert!(path.starts_with("media/r1/"));
        assert!(path.ends_with("_cat.png"));
    }
}
