//! Room list synchronizer.
//!
//! Holds the user's rooms in display order with a latest-message preview
//! each. Previews are updated for every room, active or not.

use aether_proto::message::{Message, RoomId, UserId, UserRef};
use aether_proto::room::RoomSummary;

/// Fallback display name for a group room without a name.
const UNNAMED_GROUP: &str = "Unnamed group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Group,
    Direct,
}

/// A room as shown in the room list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    /// Resolved display name.
    pub name: String,
    pub kind: RoomKind,
    pub members: Vec<UserRef>,
    /// Most recent message known for the room.
    pub latest: Option<Message>,
}

impl Room {
    /// Build a room from a server summary, resolving the display name from
    /// the viewpoint of `me`.
    ///
    /// Group rooms use their name. Direct rooms use the username of the
    /// first member who is not `me`, then the name, then the id.
    #[must_use]
    pub fn from_summary(summary: RoomSummary, me: &UserId) -> Self {
        let kind = if summary.is_group {
            RoomKind::Group
        } else {
            RoomKind::Direct
        };
        let name = match kind {
            RoomKind::Group => summary
                .chat_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNNAMED_GROUP.to_string()),
            RoomKind::Direct => summary
                .users
                .iter()
                .find(|u| &u.id != me && !u.username.is_empty())
                .map(|u| u.username.clone())
                .or_else(|| summary.chat_name.clone().filter(|n| !n.trim().is_empty()))
                .unwrap_or_else(|| summary.id.to_string()),
        };
        Self {
            id: summary.id,
            name,
            kind,
            members: summary.users,
            latest: summary.latest_message,
        }
    }

    /// Short preview line for the room list.
    #[must_use]
    pub fn preview(&self) -> Option<&str> {
        self.latest.as_ref().map(|m| m.content.as_str())
    }

    fn newer_preview(current: Option<Message>, incoming: Option<Message>) -> Option<Message> {
        match (current, incoming) {
            (Some(current), Some(incoming)) if current.created_at > incoming.created_at => {
                Some(current)
            }
            (current, None) => current,
            (_, incoming) => incoming,
        }
    }
}

/// Find a room in `rooms` by id, or else by case-insensitive display name.
#[must_use]
pub fn find_room<'a>(rooms: &'a [Room], key: &str) -> Option<&'a Room> {
    rooms
        .iter()
        .find(|r| r.id.as_str() == key)
        .or_else(|| rooms.iter().find(|r| r.name.eq_ignore_ascii_case(key)))
}

/// Ordered list of the user's rooms.
#[derive(Debug, Default)]
pub struct RoomList {
    rooms: Vec<Room>,
    resurface_on_message: bool,
}

impl RoomList {
    /// An empty list. With `resurface_on_message`, a room receiving a new
    /// message moves to the front.
    #[must_use]
    pub const fn new(resurface_on_message: bool) -> Self {
        Self {
            rooms: Vec::new(),
            resurface_on_message,
        }
    }

    #[must_use]
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &RoomId) -> bool {
        self.get(id).is_some()
    }

    fn position(&self, id: &RoomId) -> Option<usize> {
        self.rooms.iter().position(|r| &r.id == id)
    }

    /// Insert `room` at the front, or refresh the existing entry in place.
    ///
    /// Returns `true` when the room was new. An existing newer preview is
    /// kept.
    pub fn upsert_room(&mut self, room: Room) -> bool {
        if let Some(idx) = self.position(&room.id) {
            let existing = &mut self.rooms[idx];
            existing.name = room.name;
            existing.kind = room.kind;
            if !room.members.is_empty() {
                existing.members = room.members;
            }
            existing.latest = Room::newer_preview(existing.latest.take(), room.latest);
            false
        } else {
            self.rooms.insert(0, room);
            true
        }
    }

    /// Update the preview of the message's room.
    ///
    /// Unknown rooms and messages older than the current preview are
    /// ignored. Returns `true` when the preview changed.
    pub fn record_latest_message(&mut self, message: &Message) -> bool {
        let Some(idx) = self.position(&message.room_id) else {
            return false;
        };
        let room = &mut self.rooms[idx];
        if room
            .latest
            .as_ref()
            .is_some_and(|current| current.created_at > message.created_at)
        {
            return false;
        }
        room.latest = Some(message.clone());
        if self.resurface_on_message && idx > 0 {
            let room = self.rooms.remove(idx);
            self.rooms.insert(0, room);
        }
        true
    }

    /// Remove and return a room.
    pub fn remove_room(&mut self, id: &RoomId) -> Option<Room> {
        self.position(id).map(|idx| self.rooms.remove(idx))
    }

    /// Replace the list with a fetched one, in server order.
    ///
    /// Repeated ids keep their first occurrence; a newer local preview of a
    /// room survives the refresh.
    pub fn replace_all(&mut self, rooms: Vec<Room>) {
        let mut previous = std::mem::take(&mut self.rooms);
        for mut room in rooms {
            if self.contains(&room.id) {
                continue;
            }
            if let Some(idx) = previous.iter().position(|r| r.id == room.id) {
                let old = previous.swap_remove(idx);
                room.latest = Room::newer_preview(old.latest, room.latest);
            }
            self.rooms.push(room);
        }
    }

    /// Change a room's display name in place.
    pub fn rename_room(&mut self, id: &RoomId, name: impl Into<String>) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.rooms[idx].name = name.into();
                true
            }
            None => false,
        }
    }
}
