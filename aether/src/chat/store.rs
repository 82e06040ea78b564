//! Visible message sequence for the active room.
//!
//! [`MessageStore`] merges three sources into one ordered, duplicate-free
//! sequence: history pages (newest-first from the server), live deliveries,
//! and optimistic local sends. Only the active room is held; switching rooms
//! resets the store and history is fetched again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use aether_proto::message::{ClientMessageId, Message, MessageId, RoomId, UserId, UserRef};

/// Delivery state of a message in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent locally, not yet echoed by the server.
    Pending,
    /// Stored by the server.
    Confirmed,
    /// No echo within the acknowledgment timeout.
    Failed,
}

/// A message as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Server id; `None` while a local send is unconfirmed.
    pub id: Option<MessageId>,
    /// Provisional id of a local send.
    pub client_id: Option<ClientMessageId>,
    pub room_id: RoomId,
    /// Author; `None` for system messages.
    pub sender: Option<UserRef>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Authored by the session user.
    pub is_mine: bool,
    pub delivery: Delivery,
}

impl StoredMessage {
    fn from_message(message: Message, me: &UserId) -> Self {
        let is_mine = message.is_from(me);
        Self {
            id: Some(message.id),
            client_id: message.client_id,
            room_id: message.room_id,
            sender: message.sender,
            content: message.content,
            created_at: message.created_at,
            is_mine,
            delivery: Delivery::Confirmed,
        }
    }

    /// Display name of the author.
    #[must_use]
    pub fn sender_name(&self) -> &str {
        match &self.sender {
            Some(user) if !user.username.is_empty() => &user.username,
            Some(user) => user.id.as_str(),
            None => "system",
        }
    }

    const fn is_unconfirmed(&self) -> bool {
        self.id.is_none()
    }
}

/// Result of [`MessageStore::append_live`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Added at the end of the sequence.
    Appended,
    /// Confirmed a pending local send in place.
    Reconciled,
    /// Already present; ignored.
    Duplicate,
    /// Belongs to a room other than the active one; ignored.
    OtherRoom,
}

/// Ordered, de-duplicated messages of the active room.
#[derive(Debug)]
pub struct MessageStore {
    me: UserId,
    room: Option<RoomId>,
    entries: Vec<StoredMessage>,
    ids: HashSet<MessageId>,
}

/// Reverse a newest-first page, sort it by creation time and drop repeated
/// ids. The sort is stable, so equal timestamps keep the oldest-first order.
fn normalize_page(mut page: Vec<Message>) -> Vec<Message> {
    page.reverse();
    page.sort_by_key(|m| m.created_at);
    let mut seen = HashSet::with_capacity(page.len());
    page.retain(|m| seen.insert(m.id.clone()));
    page
}

impl MessageStore {
    /// An empty store for `me`, bound to no room.
    #[must_use]
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            room: None,
            entries: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// The room whose messages are held.
    #[must_use]
    pub const fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// The visible sequence, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[StoredMessage] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a message with `id` is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Bind the store to `room` and clear it.
    pub fn reset(&mut self, room: Option<RoomId>) {
        self.room = room;
        self.entries.clear();
        self.ids.clear();
    }

    /// Install a history page for `room`.
    ///
    /// The page is normalized to oldest-first. Present entries that the page
    /// does not contain are kept: confirmed ones older than the page before
    /// it, everything else (live arrivals, local sends) after it in existing
    /// order. A page echoing the client id of a local send confirms it.
    /// Returns `false` when `room` is not the store's room.
    pub fn load_history(&mut self, room: &RoomId, page: Vec<Message>) -> bool {
        if self.room.as_ref() != Some(room) {
            tracing::debug!(room_id = %room, "discarding history for inactive room");
            return false;
        }
        let page = normalize_page(page);
        let page_ids: HashSet<&MessageId> = page.iter().map(|m| &m.id).collect();
        let echoed: HashSet<ClientMessageId> = page.iter().filter_map(|m| m.client_id).collect();
        let page_start = page.first().map(|m| m.created_at);

        let mut before = Vec::new();
        let mut after = Vec::new();
        for entry in self.entries.drain(..) {
            let in_page = entry.id.as_ref().is_some_and(|id| page_ids.contains(id));
            let echoed_send = entry.is_unconfirmed()
                && entry.client_id.is_some_and(|cid| echoed.contains(&cid));
            if in_page || echoed_send {
                continue;
            }
            let older = !entry.is_unconfirmed() && page_start.is_some_and(|t| entry.created_at < t);
            if older && after.is_empty() {
                before.push(entry);
            } else {
                after.push(entry);
            }
        }

        let me = &self.me;
        let mut entries = before;
        entries.extend(page.into_iter().map(|m| StoredMessage::from_message(m, me)));
        entries.extend(after);

        self.ids = entries.iter().filter_map(|e| e.id.clone()).collect();
        self.entries = entries;
        true
    }

    /// Insert an older history page before the current content, skipping
    /// ids already present. Returns the number of messages inserted.
    pub fn prepend_older(&mut self, room: &RoomId, page: Vec<Message>) -> usize {
        if self.room.as_ref() != Some(room) {
            return 0;
        }
        let older: Vec<StoredMessage> = normalize_page(page)
            .into_iter()
            .filter(|m| !self.ids.contains(&m.id))
            .map(|m| StoredMessage::from_message(m, &self.me))
            .collect();
        let inserted = older.len();
        self.ids.extend(older.iter().filter_map(|e| e.id.clone()));
        self.entries.splice(0..0, older);
        inserted
    }

    /// Add a live delivery.
    ///
    /// Ignored when the id is already present or the message belongs to
    /// another room. A message echoing the client id of a local send
    /// replaces that entry in place.
    pub fn append_live(&mut self, message: Message) -> AppendOutcome {
        if self.room.as_ref() != Some(&message.room_id) {
            return AppendOutcome::OtherRoom;
        }
        if self.ids.contains(&message.id) {
            tracing::debug!(message_id = %message.id, "duplicate live message");
            return AppendOutcome::Duplicate;
        }
        self.ids.insert(message.id.clone());

        if let Some(cid) = message.client_id
            && let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.is_unconfirmed() && e.client_id == Some(cid))
        {
            *entry = StoredMessage::from_message(message, &self.me);
            return AppendOutcome::Reconciled;
        }

        self.entries
            .push(StoredMessage::from_message(message, &self.me));
        AppendOutcome::Appended
    }

    /// Show a local send before the server confirms it.
    ///
    /// Returns `false` when the store is bound to no room or `client_id` is
    /// already present.
    pub fn push_pending(
        &mut self,
        client_id: ClientMessageId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> bool {
        let Some(room) = self.room.clone() else {
            return false;
        };
        if self.entries.iter().any(|e| e.client_id == Some(client_id)) {
            return false;
        }
        self.entries.push(StoredMessage {
            id: None,
            client_id: Some(client_id),
            room_id: room,
            sender: Some(UserRef::new(self.me.as_str(), "")),
            content: content.into(),
            created_at,
            is_mine: true,
            delivery: Delivery::Pending,
        });
        true
    }

    /// Mark an unconfirmed local send as failed.
    pub fn mark_failed(&mut self, client_id: ClientMessageId) -> bool {
        self.set_delivery(client_id, Delivery::Failed)
    }

    /// Mark a failed local send as pending again (retry).
    pub fn mark_pending(&mut self, client_id: ClientMessageId) -> bool {
        self.set_delivery(client_id, Delivery::Pending)
    }

    /// The unconfirmed local send with `client_id`.
    #[must_use]
    pub fn pending(&self, client_id: ClientMessageId) -> Option<&StoredMessage> {
        self.entries
            .iter()
            .find(|e| e.is_unconfirmed() && e.client_id == Some(client_id))
    }

    fn set_delivery(&mut self, client_id: ClientMessageId, delivery: Delivery) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.is_unconfirmed() && e.client_id == Some(client_id))
        {
            Some(entry) => {
                entry.delivery = delivery;
                true
            }
            None => false,
        }
    }
}
