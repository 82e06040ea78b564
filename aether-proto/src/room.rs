//! Room list entries as returned by the room endpoints.

use serde::{Deserialize, Serialize};

use crate::message::{Message, RoomId, UserRef};

/// Summary of a room as listed, created or renamed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Room identifier.
    #[serde(rename = "_id", alias = "id")]
    pub id: RoomId,
    /// Group name; usually absent for direct rooms.
    #[serde(default, rename = "chatName", skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    /// `true` for group rooms, `false` for one-to-one rooms.
    #[serde(default, rename = "isGroupChat")]
    pub is_group: bool,
    /// Members of the room.
    #[serde(default)]
    pub users: Vec<UserRef>,
    /// Most recent message, if the server populated it.
    #[serde(default, rename = "latestMessage", skip_serializing_if = "Option::is_none")]
    pub latest_message: Option<Message>,
}
