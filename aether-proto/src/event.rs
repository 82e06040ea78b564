//! Streaming protocol events.
//!
//! Every frame on the live connection is one named event with a JSON
//! payload. [`ClientEvent`] flows client→server and [`ServerEvent`]
//! server→client; see [`crate::codec`] for the frame encoding.

use serde::{Deserialize, Serialize};

use crate::message::{ClientMessageId, Message, RoomId};

/// Event name for subscribing to a room.
pub const JOIN_CHAT: &str = "join_chat";
/// Event name for unsubscribing from a room.
pub const LEAVE_CHAT: &str = "leave_chat";
/// Event name for submitting a message.
pub const SEND_MESSAGE: &str = "send_message";
/// Event name for typing activity (both directions).
pub const TYPING: &str = "typing";
/// Event name for a delivered message.
pub const RECEIVE_MESSAGE: &str = "receive_message";
/// Event name for a handshake or connection failure.
pub const CONNECT_ERROR: &str = "connect_error";

/// Payload of a `send_message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target room.
    #[serde(rename = "chatId", alias = "roomId")]
    pub room_id: RoomId,
    /// Message text.
    pub content: String,
    /// Provisional id the server should echo on broadcast.
    #[serde(rename = "clientId")]
    pub client_id: ClientMessageId,
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Subscribe to live events of a room.
    JoinChat(RoomId),
    /// Stop receiving live events of a room.
    LeaveChat(RoomId),
    /// Submit a new message.
    SendMessage(OutgoingMessage),
    /// Tell the room's other members that the local user is typing.
    Typing(RoomId),
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => JOIN_CHAT,
            Self::LeaveChat(_) => LEAVE_CHAT,
            Self::SendMessage(_) => SEND_MESSAGE,
            Self::Typing(_) => TYPING,
        }
    }

    /// Room the event targets.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        match self {
            Self::JoinChat(room) | Self::LeaveChat(room) | Self::Typing(room) => room,
            Self::SendMessage(msg) => &msg.room_id,
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A message was stored in a subscribed room.
    ReceiveMessage(Message),
    /// A peer is typing. `None` means the currently joined room.
    Typing {
        /// Room the activity belongs to, when the server names it.
        room_id: Option<RoomId>,
    },
    /// The server refused the handshake or dropped the session.
    ConnectError(String),
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => RECEIVE_MESSAGE,
            Self::Typing { .. } => TYPING,
            Self::ConnectError(_) => CONNECT_ERROR,
        }
    }
}
