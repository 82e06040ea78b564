//! JSON frame codec for the streaming protocol.
//!
//! Wire format: one WebSocket text frame per event,
//! `{"event": "<name>", "data": <payload>}`. `data` may be omitted for
//! events without a payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{
    CONNECT_ERROR, ClientEvent, JOIN_CHAT, LEAVE_CHAT, OutgoingMessage, RECEIVE_MESSAGE,
    SEND_MESSAGE, ServerEvent, TYPING,
};
use crate::message::RoomId;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or not a `{event, data}` object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The event name is not part of the protocol.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The payload does not match the event's schema.
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event whose payload failed to parse.
        event: String,
        /// Parser diagnostic.
        reason: String,
    },
}

#[derive(Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

fn to_frame(event: &str, data: Value) -> Result<String, CodecError> {
    serde_json::to_string(&Frame {
        event: event.to_string(),
        data,
    })
    .map_err(|e| CodecError::Malformed(e.to_string()))
}

fn parse_frame(text: &str) -> Result<Frame, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|e| CodecError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

fn value<T: Serialize>(data: &T) -> Result<Value, CodecError> {
    serde_json::to_value(data).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Encodes a client event as a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the payload cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    let data = match event {
        ClientEvent::JoinChat(room) | ClientEvent::LeaveChat(room) | ClientEvent::Typing(room) => {
            value(room)?
        }
        ClientEvent::SendMessage(msg) => value(msg)?,
    };
    to_frame(event.name(), data)
}

/// Decodes a client event from a text frame (server side and tests).
///
/// # Errors
///
/// Returns [`CodecError`] for malformed JSON, unknown event names, or
/// payloads that do not match the event.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    let Frame { event, data } = parse_frame(text)?;
    match event.as_str() {
        JOIN_CHAT => Ok(ClientEvent::JoinChat(payload(&event, data)?)),
        LEAVE_CHAT => Ok(ClientEvent::LeaveChat(payload(&event, data)?)),
        TYPING => Ok(ClientEvent::Typing(payload(&event, data)?)),
        SEND_MESSAGE => Ok(ClientEvent::SendMessage(payload::<OutgoingMessage>(
            &event, data,
        )?)),
        _ => Err(CodecError::UnknownEvent(event)),
    }
}

/// Encodes a server event as a text frame (server side and tests).
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the payload cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    let data = match event {
        ServerEvent::ReceiveMessage(msg) => value(msg)?,
        ServerEvent::Typing { room_id } => value(room_id)?,
        ServerEvent::ConnectError(detail) => value(detail)?,
    };
    to_frame(event.name(), data)
}

/// Decodes a server event from a text frame.
///
/// `typing` accepts a missing/`null` payload, a bare room id, or an object
/// carrying `roomId`/`chatId`. `connect_error` accepts a string or an
/// object with a `message` field.
///
/// # Errors
///
/// Returns [`CodecError`] for malformed JSON, unknown event names, or
/// payloads that do not match the event.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    let Frame { event, data } = parse_frame(text)?;
    match event.as_str() {
        RECEIVE_MESSAGE => Ok(ServerEvent::ReceiveMessage(payload(&event, data)?)),
        TYPING => Ok(ServerEvent::Typing {
            room_id: typing_room(&event, data)?,
        }),
        CONNECT_ERROR => Ok(ServerEvent::ConnectError(error_detail(data))),
        _ => Err(CodecError::UnknownEvent(event)),
    }
}

fn typing_room(event: &str, data: Value) -> Result<Option<RoomId>, CodecError> {
    match data {
        Value::Null => Ok(None),
        Value::String(room) => Ok(Some(RoomId::new(room))),
        Value::Object(map) => Ok(map
            .get("roomId")
            .or_else(|| map.get("chatId"))
            .and_then(Value::as_str)
            .map(RoomId::new)),
        other => Err(CodecError::InvalidPayload {
            event: event.to_string(),
            reason: format!("expected room id, got {other}"),
        }),
    }
}

fn error_detail(data: Value) -> String {
    match data {
        Value::String(detail) => detail,
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| Value::Object(map.clone()).to_string(), str::to_string),
        Value::Null => "connection refused".to_string(),
        other => other.to_string(),
    }
}
