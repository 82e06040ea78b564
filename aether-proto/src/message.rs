//! Message and identity types shared by the streaming protocol and the
//! request/response API.
//!
//! Field names follow the server's JSON documents (`_id`, `chat`,
//! `createdAt`), with aliases for the flatter spellings some endpoints use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (16 KB).
pub const MAX_CONTENT_SIZE: usize = 16 * 1024;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a server-assigned identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Server-assigned message identifier, unique within a room.
    MessageId
);
string_id!(
    /// Server-assigned room (chat) identifier.
    RoomId
);
string_id!(
    /// Server-assigned user identifier.
    UserId
);

/// Provisional identifier generated by the client for an outgoing message.
///
/// Echoed back by the server on the broadcast of the stored message so the
/// sender can reconcile its optimistic local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMessageId(Uuid);

impl ClientMessageId {
    /// Creates a new time-ordered provisional identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ClientMessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a user as embedded in messages, rooms and search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// The user's identifier.
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub username: String,
    /// Optional avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl UserRef {
    /// Creates a user reference without an avatar.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            username: username.into(),
            profile_picture: None,
        }
    }
}

/// A stored chat message as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier.
    #[serde(rename = "_id", alias = "id")]
    pub id: MessageId,
    /// Room the message belongs to.
    #[serde(rename = "chat", alias = "roomId", alias = "chatId")]
    pub room_id: RoomId,
    /// Author; `None` for system-originated messages.
    #[serde(default)]
    pub sender: Option<UserRef>,
    /// Text content.
    pub content: String,
    /// Server creation time.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Provisional id of the originating send, when the server echoes it.
    #[serde(default, rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientMessageId>,
}

impl Message {
    /// Returns `true` if the message was authored by `user`.
    #[must_use]
    pub fn is_from(&self, user: &UserId) -> bool {
        self.sender.as_ref().is_some_and(|s| &s.id == user)
    }

    /// Returns `true` if the message has no human sender.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.sender.is_none()
    }
}

/// Errors from validating outgoing message content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty or whitespace only.
    #[error("message content is empty")]
    EmptyContent,

    /// Content exceeds [`MAX_CONTENT_SIZE`].
    #[error("message too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Trims outgoing content and checks it is sendable.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyContent`] for blank input and
/// [`ValidationError::TooLarge`] when the trimmed text exceeds
/// [`MAX_CONTENT_SIZE`] bytes.
pub fn validate_content(content: &str) -> Result<&str, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if trimmed.len() > MAX_CONTENT_SIZE {
        return Err(ValidationError::TooLarge {
            size: trimmed.len(),
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(trimmed)
}
