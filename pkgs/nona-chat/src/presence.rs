//! Presence tracker - typing flags and last-seen per (user, room)

use crate::backend::{bounded, DocumentStore};
use crate::error::Result;
use crate::session::Session;
use crate::subscription::Subscription;
use crate::types::PresenceEntry;
use crate::ChatConfig;
use std::sync::Arc;
use tracing::debug;

/// Users other than `self_id` currently typing
pub fn typing_users(entries: &[PresenceEntry], self_id: &str) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.is_typing && e.user_id != self_id)
        .map(|e| e.user_id.clone())
        .collect()
}

/// Indicator text for the typing users, `None` when nobody types
pub fn typing_label(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{} is typing...", one)),
        [first, second] => Some(format!("{} and {} are typing...", first, second)),
        many => Some(format!("{} people are typing...", many.len())),
    }
}

pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
    config: ChatConfig,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>, config: ChatConfig) -> Self {
        Self {
            store,
            session,
            config,
        }
    }

    /// Publish our own entry for `room_id`
    pub async fn update(&self, room_id: &str, is_typing: bool) -> Result<()> {
        let user = self.session.require_user()?;
        bounded(
            self.config.remote_timeout,
            "presence update",
            self.store.upsert_presence(&user.uid, room_id, is_typing),
        )
        .await?;
        debug!(room_id, is_typing, "Presence updated");
        Ok(())
    }

    /// Entries of `room_id`, most recently seen first
    pub async fn subscribe<F>(&self, room_id: &str, mut on_presence: F) -> Result<Subscription>
    where
        F: FnMut(Vec<PresenceEntry>) + Send + 'static,
    {
        let feed = bounded(
            self.config.remote_timeout,
            "presence subscription",
            self.store.subscribe_presence(room_id),
        )
        .await?;

        let room = room_id.to_string();
        Ok(Subscription::spawn(
            format!("presence:{}", room_id),
            feed,
            move |batch| {
                let mut entries: Vec<PresenceEntry> =
                    batch.into_iter().filter(|e| e.room_id == room).collect();
                entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
                on_presence(entries);
            },
        ))
    }
}
