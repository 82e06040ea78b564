//! Acknowledgment tracking for local sends.
//!
//! A send is acknowledged when the server broadcasts the stored message
//! carrying the send's [`ClientMessageId`]. Sends without an echo before
//! their deadline become failed and stay so until explicitly retried.

use std::time::{Duration, Instant};

use aether_proto::event::{ClientEvent, OutgoingMessage};
use aether_proto::message::{ClientMessageId, RoomId};

/// Default time to wait for the server's echo.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct PendingSend {
    client_id: ClientMessageId,
    room_id: RoomId,
    content: String,
    deadline: Instant,
    failed: bool,
}

impl PendingSend {
    fn event(&self) -> ClientEvent {
        ClientEvent::SendMessage(OutgoingMessage {
            room_id: self.room_id.clone(),
            content: self.content.clone(),
            client_id: self.client_id,
        })
    }
}

/// Unacknowledged local sends, oldest first.
#[derive(Debug)]
pub struct Outbox {
    ack_timeout: Duration,
    sends: Vec<PendingSend>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TIMEOUT)
    }
}

impl Outbox {
    #[must_use]
    pub const fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            sends: Vec::new(),
        }
    }

    /// Start waiting for the echo of a send. Returns the event to emit.
    pub fn track(
        &mut self,
        client_id: ClientMessageId,
        room_id: RoomId,
        content: impl Into<String>,
        now: Instant,
    ) -> ClientEvent {
        let send = PendingSend {
            client_id,
            room_id,
            content: content.into(),
            deadline: now + self.ack_timeout,
            failed: false,
        };
        let event = send.event();
        self.sends.push(send);
        event
    }

    /// The echo arrived. Returns `false` for an unknown id.
    pub fn confirm(&mut self, client_id: ClientMessageId) -> bool {
        let before = self.sends.len();
        self.sends.retain(|s| s.client_id != client_id);
        self.sends.len() != before
    }

    /// Mark every send whose deadline has passed as failed and return the
    /// newly failed ids.
    pub fn expire(&mut self, now: Instant) -> Vec<ClientMessageId> {
        self.sends
            .iter_mut()
            .filter(|s| !s.failed && now >= s.deadline)
            .map(|s| {
                s.failed = true;
                s.client_id
            })
            .collect()
    }

    /// Re-arm a failed send. Returns the event to emit again, with the same
    /// client id so a late echo still matches.
    pub fn retry(&mut self, client_id: ClientMessageId, now: Instant) -> Option<ClientEvent> {
        let send = self
            .sends
            .iter_mut()
            .find(|s| s.failed && s.client_id == client_id)?;
        send.failed = false;
        send.deadline = now + self.ack_timeout;
        Some(send.event())
    }

    /// Most recent failed send.
    #[must_use]
    pub fn latest_failed(&self) -> Option<ClientMessageId> {
        self.sends.iter().rev().find(|s| s.failed).map(|s| s.client_id)
    }

    /// Stop tracking every send to `room`. Returns their ids.
    pub fn drop_room(&mut self, room: &RoomId) -> Vec<ClientMessageId> {
        let dropped = self
            .sends
            .iter()
            .filter(|s| &s.room_id == room)
            .map(|s| s.client_id)
            .collect();
        self.sends.retain(|s| &s.room_id != room);
        dropped
    }

    /// Earliest deadline of a send still waiting.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sends
            .iter()
            .filter(|s| !s.failed)
            .map(|s| s.deadline)
            .min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }
}
