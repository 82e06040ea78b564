//! Room membership: which room the live connection is subscribed to.
//!
//! The desired room is latched independently of the connection, so a room
//! chosen while offline is joined as soon as a transport exists, and the
//! subscription is recovered after every reconnect. This is the only place
//! that decides when to join or leave.

use aether_proto::event::ClientEvent;
use aether_proto::message::RoomId;

/// A subscription change to send to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipIntent {
    /// Subscribe to the room's live events.
    Join(RoomId),
    /// Stop receiving the room's live events.
    Leave(RoomId),
}

impl MembershipIntent {
    /// The protocol event carrying this intent.
    #[must_use]
    pub fn into_event(self) -> ClientEvent {
        match self {
            Self::Join(room) => ClientEvent::JoinChat(room),
            Self::Leave(room) => ClientEvent::LeaveChat(room),
        }
    }
}

/// Tracks the desired active room and the room actually subscribed.
#[derive(Debug, Default)]
pub struct RoomMembership {
    desired: Option<RoomId>,
    subscribed: Option<RoomId>,
}

impl RoomMembership {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The room the user has selected, connected or not.
    #[must_use]
    pub const fn active_room(&self) -> Option<&RoomId> {
        self.desired.as_ref()
    }

    /// The room the current transport is subscribed to.
    #[must_use]
    pub const fn subscribed(&self) -> Option<&RoomId> {
        self.subscribed.as_ref()
    }

    /// Whether `room` is the selected room.
    #[must_use]
    pub fn is_active(&self, room: &RoomId) -> bool {
        self.desired.as_ref() == Some(room)
    }

    /// Select `room` (or none).
    ///
    /// Selecting the current room yields nothing. While connected, a switch
    /// yields `Leave(old)` before `Join(new)`. While disconnected the choice
    /// is only latched.
    pub fn set_active_room(
        &mut self,
        room: Option<RoomId>,
        connected: bool,
    ) -> Vec<MembershipIntent> {
        if self.desired == room {
            return Vec::new();
        }
        self.desired.clone_from(&room);
        if !connected {
            return Vec::new();
        }

        let mut intents = Vec::with_capacity(2);
        if let Some(old) = self.subscribed.take() {
            intents.push(MembershipIntent::Leave(old));
        }
        if let Some(new) = room {
            self.subscribed = Some(new.clone());
            intents.push(MembershipIntent::Join(new));
        }
        intents
    }

    /// A fresh transport has no subscriptions: rejoin the desired room.
    pub fn on_connected(&mut self) -> Option<MembershipIntent> {
        self.subscribed.clone_from(&self.desired);
        self.desired.clone().map(MembershipIntent::Join)
    }

    /// The transport is gone, and so are its subscriptions.
    pub fn on_disconnected(&mut self) {
        self.subscribed = None;
    }
}
