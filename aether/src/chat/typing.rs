//! Ephemeral typing state.
//!
//! Inbound activity is kept as one expiry instant per room: active while
//! `now < expiry`, and every new signal moves the expiry forward rather than
//! stacking timers. Time is always passed in explicitly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use aether_proto::message::RoomId;

/// Default time a typing signal stays visible.
pub const DEFAULT_TYPING_WINDOW: Duration = Duration::from_secs(3);

/// Default minimum gap between outgoing typing events for one room.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Who-is-typing state per room.
#[derive(Debug)]
pub struct TypingPresence {
    window: Duration,
    expiries: HashMap<RoomId, Instant>,
}

impl Default for TypingPresence {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_WINDOW)
    }
}

impl TypingPresence {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            expiries: HashMap::new(),
        }
    }

    /// Record activity in `room`, extending its expiry to `now + window`.
    pub fn signal(&mut self, room: RoomId, now: Instant) {
        self.expiries.insert(room, now + self.window);
    }

    #[must_use]
    pub fn is_active(&self, room: &RoomId, now: Instant) -> bool {
        self.expiries.get(room).is_some_and(|expiry| now < *expiry)
    }

    /// Drop every room whose expiry has passed and return them.
    pub fn expire(&mut self, now: Instant) -> Vec<RoomId> {
        let expired: Vec<RoomId> = self
            .expiries
            .iter()
            .filter(|(_, expiry)| now >= **expiry)
            .map(|(room, _)| room.clone())
            .collect();
        for room in &expired {
            self.expiries.remove(room);
        }
        expired
    }

    /// Earliest pending expiry, for arming a timer.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.expiries.values().min().copied()
    }

    pub fn clear(&mut self, room: &RoomId) {
        self.expiries.remove(room);
    }

    pub fn clear_all(&mut self) {
        self.expiries.clear();
    }
}

/// Rate limit for outgoing typing events.
#[derive(Debug)]
pub struct TypingThrottle {
    interval: Duration,
    last_sent: HashMap<RoomId, Instant>,
}

impl Default for TypingThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_EMIT_INTERVAL)
    }
}

impl TypingThrottle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: HashMap::new(),
        }
    }

    /// Whether a typing event for `room` may go out at `now`. Records the
    /// emission when it may.
    pub fn should_emit(&mut self, room: &RoomId, now: Instant) -> bool {
        match self.last_sent.get(room) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => false,
            _ => {
                self.last_sent.insert(room.clone(), now);
                true
            }
        }
    }

    /// Forget the last emission for `room`, e.g. after sending a message.
    pub fn reset(&mut self, room: &RoomId) {
        self.last_sent.remove(room);
    }
}
