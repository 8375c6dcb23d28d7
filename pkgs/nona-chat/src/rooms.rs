//! Room registry - live room list with public/ephemeral split and expiry

use crate::backend::{bounded, DocumentStore};
use crate::error::{ChatError, Result};
use crate::session::Session;
use crate::subscription::Subscription;
use crate::types::{NewRoom, Room, RoomKind, Timestamp};
use crate::ChatConfig;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Remaining lifetime of an ephemeral room, bucketed for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryLabel {
    Expired,
    Minutes(i64),
    Hours(i64),
    Days(i64),
}

impl fmt::Display for ExpiryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryLabel::Expired => write!(f, "expired"),
            ExpiryLabel::Minutes(m) => write!(f, "{} min", m),
            ExpiryLabel::Hours(h) => write!(f, "{}h", h),
            ExpiryLabel::Days(d) => write!(f, "{}d", d),
        }
    }
}

/// Derived lifecycle state; never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Permanent,
    Active,
    Expired,
}

/// Remaining-time label for `room` at `now`; `None` for public rooms
pub fn compute_expiry_label(room: &Room, now: Timestamp) -> Option<ExpiryLabel> {
    if room.kind != RoomKind::Ephemeral {
        return None;
    }
    let expires_at = room.expires_at?;
    if now > expires_at {
        return Some(ExpiryLabel::Expired);
    }

    let remaining = expires_at - now;
    let label = if remaining < chrono::Duration::hours(1) {
        // Still live, so never show zero
        ExpiryLabel::Minutes(remaining.num_minutes().max(1))
    } else if remaining < chrono::Duration::hours(24) {
        ExpiryLabel::Hours(remaining.num_hours())
    } else {
        ExpiryLabel::Days(remaining.num_days())
    };
    Some(label)
}

pub fn room_status(room: &Room, now: Timestamp) -> RoomStatus {
    match room.expires_at {
        Some(expires_at) if room.is_ephemeral() && now > expires_at => RoomStatus::Expired,
        Some(_) if room.is_ephemeral() => RoomStatus::Active,
        _ => RoomStatus::Permanent,
    }
}

/// Relative age of a room: `12 min ago`, `3h ago`, then a short date
pub fn created_label(room: &Room, now: Timestamp) -> String {
    let age = now - room.created_at;
    if age < chrono::Duration::hours(1) {
        format!("{} min ago", age.num_minutes().max(0))
    } else if age < chrono::Duration::hours(24) {
        format!("{}h ago", age.num_hours())
    } else {
        room.created_at.format("%-d %b").to_string()
    }
}

/// Split into (public, ephemeral), keeping relative order
pub fn partition(rooms: &[Room]) -> (Vec<Room>, Vec<Room>) {
    rooms.iter().cloned().partition(|r| r.kind == RoomKind::Public)
}

/// Order rooms newest first
pub fn sort_newest_first(rooms: &mut [Room]) {
    rooms.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Ephemeral rooms past their expiry at `now`
pub fn expired_rooms(rooms: &[Room], now: Timestamp) -> Vec<&Room> {
    rooms
        .iter()
        .filter(|r| room_status(r, now) == RoomStatus::Expired)
        .collect()
}

/// Live view of all rooms
pub struct RoomRegistry {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
    config: ChatConfig,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>, config: ChatConfig) -> Self {
        Self {
            store,
            session,
            config,
        }
    }

    /// Deliver the full room list, newest first, after every change batch
    pub async fn subscribe<F>(&self, mut on_rooms: F) -> Result<Subscription>
    where
        F: FnMut(Vec<Room>) + Send + 'static,
    {
        let feed = bounded(
            self.config.remote_timeout,
            "room subscription",
            self.store.subscribe_rooms(),
        )
        .await?;

        Ok(Subscription::spawn("rooms", feed, move |mut rooms| {
            sort_newest_first(&mut rooms);
            debug!("Room list updated ({} rooms)", rooms.len());
            on_rooms(rooms);
        }))
    }

    /// Create a room owned by the signed-in user
    pub async fn create(&self, name: &str, description: &str, kind: RoomKind) -> Result<Room> {
        self.create_at(name, description, kind, Utc::now()).await
    }

    /// Create a room as of `now`; an ephemeral room expires exactly one TTL later
    pub async fn create_at(
        &self,
        name: &str,
        description: &str,
        kind: RoomKind,
        now: Timestamp,
    ) -> Result<Room> {
        let name = name.trim();
        let description = description.trim();

        if name.is_empty() {
            return Err(ChatError::validation("room name is empty"));
        }
        if name.chars().count() > self.config.max_room_name_chars {
            return Err(ChatError::validation(format!(
                "room name exceeds {} characters",
                self.config.max_room_name_chars
            )));
        }
        if description.chars().count() > self.config.max_room_description_chars {
            return Err(ChatError::validation(format!(
                "room description exceeds {} characters",
                self.config.max_room_description_chars
            )));
        }
        let user = self.session.require_user()?;

        let draft = NewRoom {
            name: name.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            kind,
            created_by: user.uid,
            created_at: now,
            expires_at: match kind {
                RoomKind::Ephemeral => Some(now + self.config.ephemeral_room_ttl),
                RoomKind::Public => None,
            },
        };

        let room = bounded(
            self.config.remote_timeout,
            "room creation",
            self.store.create_room(draft),
        )
        .await?;
        info!(room_id = %room.id, kind = ?room.kind, "Created room '{}'", room.name);
        Ok(room)
    }

    /// Join `room_id`; joining twice is a no-op
    pub async fn join(&self, room_id: &str) -> Result<()> {
        self.set_membership(room_id, true).await
    }

    /// Leave `room_id`; leaving a room you are not in is a no-op
    pub async fn leave(&self, room_id: &str) -> Result<()> {
        self.set_membership(room_id, false).await
    }

    async fn set_membership(&self, room_id: &str, joined: bool) -> Result<()> {
        let user = self.session.require_user()?;
        bounded(
            self.config.remote_timeout,
            "membership update",
            self.store.set_membership(room_id, &user.uid, joined),
        )
        .await?;
        debug!(room_id, joined, "Membership updated");
        Ok(())
    }
}
