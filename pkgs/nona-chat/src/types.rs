//! Records exchanged with the hosted store and the local outbox

use crate::timestamp;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type Timestamp = DateTime<Utc>;

/// Message type
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    File,
}

impl MessageKind {
    /// Non-text messages carry an uploaded media reference
    pub fn requires_media(self) -> bool {
        self != MessageKind::Text
    }

    /// Classify an attachment by the MIME type guessed from its file name
    pub fn from_file_name(file_name: &str) -> Self {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        if mime.type_() == mime_guess::mime::IMAGE {
            MessageKind::Image
        } else if mime.type_() == mime_guess::mime::AUDIO {
            MessageKind::Voice
        } else {
            MessageKind::File
        }
    }
}

/// Uploaded media attached to a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Emoji reaction left by one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: Timestamp,
}

/// Per-emoji reaction tally for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: usize,
    pub mine: bool,
}

/// Chat message as held by the authoritative store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub room_id: String,
    pub content: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: Timestamp,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: Timestamp,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Whether the message belongs in the live view of `room_id`
    pub fn is_visible_in(&self, room_id: &str) -> bool {
        self.room_id == room_id && !self.is_deleted
    }

    pub fn has_reaction(&self, emoji: &str, user_id: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.emoji == emoji && r.user_id == user_id)
    }

    /// Group reactions by emoji, in order of first appearance
    pub fn reaction_summary(&self, user_id: &str) -> Vec<ReactionCount> {
        let mut summary: Vec<ReactionCount> = Vec::new();
        for reaction in &self.reactions {
            let mine = reaction.user_id == user_id;
            match summary.iter_mut().find(|c| c.emoji == reaction.emoji) {
                Some(entry) => {
                    entry.count += 1;
                    entry.mine |= mine;
                }
                None => summary.push(ReactionCount {
                    emoji: reaction.emoji.clone(),
                    count: 1,
                    mine,
                }),
            }
        }
        summary
    }
}

/// Message about to be created; the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub author_id: String,
    pub room_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub media: Option<MediaRef>,
}

/// Mutation of an existing message record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePatch {
    Edit { content: String },
    SoftDelete,
    AddReaction { emoji: String, user_id: String },
    RemoveReaction { emoji: String, user_id: String },
}

impl MessagePatch {
    /// Apply the patch using the store clock `now`; returns whether the record changed
    pub fn apply(&self, message: &mut Message, now: Timestamp) -> bool {
        match self {
            MessagePatch::Edit { content } => {
                message.content = content.clone();
                message.is_edited = true;
                message.updated_at = now;
                true
            }
            MessagePatch::SoftDelete => {
                message.is_deleted = true;
                message.updated_at = now;
                true
            }
            MessagePatch::AddReaction { emoji, user_id } => {
                if message.has_reaction(emoji, user_id) {
                    return false;
                }
                message.reactions.push(Reaction {
                    emoji: emoji.clone(),
                    user_id: user_id.clone(),
                    created_at: now,
                });
                true
            }
            MessagePatch::RemoveReaction { emoji, user_id } => {
                let before = message.reactions.len();
                message
                    .reactions
                    .retain(|r| !(r.emoji == *emoji && r.user_id == *user_id));
                message.reactions.len() != before
            }
        }
    }
}

/// Room type
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    #[default]
    Public,
    Ephemeral,
}

/// Chat room as held by the authoritative store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: RoomKind,
    pub created_by: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: Timestamp,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Box<Message>>,
    #[serde(default)]
    pub is_private: bool,
}

impl Room {
    pub fn is_ephemeral(&self) -> bool {
        self.kind == RoomKind::Ephemeral
    }

    /// Add or remove `user_id`; returns whether membership changed
    pub fn set_member(&mut self, user_id: &str, joined: bool) -> bool {
        let present = self.members.iter().any(|m| m == user_id);
        let changed = match (present, joined) {
            (false, true) => {
                self.members.push(user_id.to_string());
                true
            }
            (true, false) => {
                self.members.retain(|m| m != user_id);
                true
            }
            _ => false,
        };
        self.member_count = self.members.len() as u32;
        changed
    }
}

/// Room about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    pub kind: RoomKind,
    pub created_by: String,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

/// Media selected while offline, still on local disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMedia {
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
}

impl PendingMedia {
    /// Describe a local file without reading it
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self {
            path,
            file_name,
            file_size: metadata.len(),
        })
    }

    /// Read the file into memory for upload
    pub async fn load(&self) -> std::io::Result<MediaUpload> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(MediaUpload {
            file_name: self.file_name.clone(),
            bytes: Bytes::from(bytes),
        })
    }
}

/// Media bytes ready to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Message composed while offline, waiting in the outbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub author_id: String,
    pub room_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<PendingMedia>,
}

/// Typing/last-seen state of one user in one room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub room_id: String,
    #[serde(default)]
    pub is_typing: bool,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub last_seen: Timestamp,
}

impl PresenceEntry {
    /// Document id in the `presence` collection
    pub fn document_id(user_id: &str, room_id: &str) -> String {
        format!("{}_{}", user_id, room_id)
    }
}

/// Signed-in user as reported by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub uid: String,
    pub display_name: Option<String>,
    pub is_anonymous: bool,
}
