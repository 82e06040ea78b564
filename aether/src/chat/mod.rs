//! Chat synchronization core.
//!
//! [`ChatCore`] is a synchronous reducer over the local view of rooms and
//! messages. Every input (a user action, a server event, a request
//! completion or a timer tick) updates state and returns the [`Effect`]s the
//! driver must carry out. Nothing here performs I/O or reads the clock on its
//! own, except for stamping optimistic sends with wall-clock time.
//!
//! Components:
//! - [`membership::RoomMembership`]: which room the connection subscribes to
//! - [`store::MessageStore`]: ordered, de-duplicated messages of the active room
//! - [`typing::TypingPresence`] / [`typing::TypingThrottle`]: ephemeral typing state
//! - [`rooms::RoomList`]: room list with latest-message previews
//! - [`outbox::Outbox`]: acknowledgment of local sends
//! - [`search::SearchDebouncer`]: debounced user search

pub mod membership;
pub mod outbox;
pub mod rooms;
pub mod search;
pub mod store;
pub mod typing;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;

use aether_proto::event::{ClientEvent, ServerEvent};
use aether_proto::message::{ClientMessageId, RoomId, UserId, UserRef, ValidationError, validate_content};
use aether_proto::room::RoomSummary;

use crate::api::{ApiError, HistoryPage, UserPage};
use crate::session::ConnectionState;

use self::membership::RoomMembership;
use self::outbox::Outbox;
use self::rooms::{Room, RoomList};
use self::search::{SearchDebouncer, SearchRequest};
use self::store::{AppendOutcome, MessageStore, StoredMessage};
use self::typing::{TypingPresence, TypingThrottle};

/// Tunables of the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Messages per history page.
    pub history_page_size: u32,
    /// Time to wait for the echo of a send before marking it failed.
    pub ack_timeout: Duration,
    /// How long an inbound typing signal stays visible.
    pub typing_window: Duration,
    /// Minimum gap between outgoing typing events per room.
    pub typing_emit_interval: Duration,
    /// Quiet period before a search is issued.
    pub search_debounce: Duration,
    /// Users per search page.
    pub search_page_size: u32,
    /// Move a room to the front of the list when it receives a message.
    pub resurface_on_message: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_page_size: 30,
            ack_timeout: outbox::DEFAULT_ACK_TIMEOUT,
            typing_window: typing::DEFAULT_TYPING_WINDOW,
            typing_emit_interval: typing::DEFAULT_EMIT_INTERVAL,
            search_debounce: search::DEFAULT_DEBOUNCE,
            search_page_size: 20,
            resurface_on_message: false,
        }
    }
}

/// Errors from user actions rejected by the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The message content is not sendable.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The action needs an active room.
    #[error("no room selected")]
    NoActiveRoom,

    /// The action needs a live connection.
    #[error("not connected")]
    NotConnected,

    /// No failed send matches the retry.
    #[error("no failed message to retry")]
    UnknownPendingMessage,

    /// The room is not in the room list.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    /// A room name must not be blank.
    #[error("room name cannot be empty")]
    EmptyName,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
}

impl Notice {
    /// The notification text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Info(text) | Self::Warning(text) => text,
        }
    }
}

/// Work the driver performs on behalf of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send an event over the live connection.
    Emit(ClientEvent),
    /// Fetch a history page; report back with the same ticket.
    FetchHistory {
        ticket: u64,
        room: RoomId,
        page: u32,
        limit: u32,
    },
    FetchRooms,
    CreateRoom(UserId),
    RenameRoom { room: RoomId, name: String },
    DeleteRoom(RoomId),
    /// Run a user search; report back with the same request.
    Search { request: SearchRequest, limit: u32 },
    /// Show a notification.
    Notify(Notice),
}

#[derive(Debug, Clone)]
struct HistoryInFlight {
    ticket: u64,
    room: RoomId,
    page: u32,
}

/// Local room changes made while a room list fetch is outstanding. The
/// fetched list may predate them, so they are applied on top of it.
#[derive(Debug, Default)]
struct RoomsInFlight {
    touched: Vec<RoomId>,
    deleted: HashSet<RoomId>,
    /// Another fetch was wanted while this one was running.
    refetch: bool,
}

/// Read-only view of the chat state for presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub connection: ConnectionState,
    /// Why the connection failed, while in the errored state.
    pub connection_error: Option<String>,
    pub active_room: Option<RoomId>,
    pub rooms: Vec<Room>,
    /// Visible messages of the active room, oldest first.
    pub messages: Vec<StoredMessage>,
    /// Someone else is typing in the active room.
    pub peer_typing: bool,
    pub loading_history: bool,
    pub has_older: bool,
    pub search_query: String,
    pub search_results: Vec<UserRef>,
    pub search_has_more: bool,
}

/// The synchronization core.
#[derive(Debug)]
pub struct ChatCore {
    me: UserId,
    config: ChatConfig,
    connected: bool,
    ever_connected: bool,
    membership: RoomMembership,
    store: MessageStore,
    typing: TypingPresence,
    throttle: TypingThrottle,
    rooms: RoomList,
    outbox: Outbox,
    search: SearchDebouncer,
    next_ticket: u64,
    history_in_flight: Option<HistoryInFlight>,
    rooms_in_flight: Option<RoomsInFlight>,
    next_older_page: u32,
    has_older: bool,
    search_results: Vec<UserRef>,
    search_has_more: bool,
}

impl ChatCore {
    /// A core for the session user `me`.
    #[must_use]
    pub fn new(me: UserId, config: ChatConfig) -> Self {
        Self {
            store: MessageStore::new(me.clone()),
            typing: TypingPresence::new(config.typing_window),
            throttle: TypingThrottle::new(config.typing_emit_interval),
            rooms: RoomList::new(config.resurface_on_message),
            outbox: Outbox::new(config.ack_timeout),
            search: SearchDebouncer::new(config.search_debounce),
            me,
            config,
            connected: false,
            ever_connected: false,
            membership: RoomMembership::new(),
            next_ticket: 0,
            history_in_flight: None,
            rooms_in_flight: None,
            next_older_page: 2,
            has_older: false,
            search_results: Vec::new(),
            search_has_more: false,
        }
    }

    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    #[must_use]
    pub const fn active_room(&self) -> Option<&RoomId> {
        self.membership.active_room()
    }

    #[must_use]
    pub const fn membership(&self) -> &RoomMembership {
        &self.membership
    }

    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    #[must_use]
    pub const fn rooms(&self) -> &RoomList {
        &self.rooms
    }

    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Whether someone else is typing in `room` at `now`.
    #[must_use]
    pub fn is_typing(&self, room: &RoomId, now: Instant) -> bool {
        self.typing.is_active(room, now)
    }

    // ---- connection ----

    /// A transport was established.
    ///
    /// Rejoins the desired room and refreshes the room list. After a
    /// reconnect the active room's newest page is fetched again so messages
    /// missed while offline are merged.
    pub fn on_connected(&mut self) -> Vec<Effect> {
        self.connected = true;
        let mut effects: Vec<Effect> = self
            .membership
            .on_connected()
            .map(|intent| Effect::Emit(intent.into_event()))
            .into_iter()
            .collect();
        if self.ever_connected
            && let Some(room) = self.membership.active_room().cloned()
        {
            tracing::debug!(room_id = %room, "refetching history after reconnect");
            effects.push(self.request_history(room, 1));
        }
        self.ever_connected = true;
        effects.extend(self.request_rooms());
        effects
    }

    /// The transport is gone.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.membership.on_disconnected();
        self.typing.clear_all();
    }

    // ---- user actions ----

    /// Switch the active room (or leave it with `None`).
    pub fn select_room(&mut self, room: Option<RoomId>) -> Vec<Effect> {
        if self.membership.active_room() == room.as_ref() {
            return Vec::new();
        }
        let previous = self.membership.active_room().cloned();
        let mut effects: Vec<Effect> = self
            .membership
            .set_active_room(room.clone(), self.connected)
            .into_iter()
            .map(|intent| Effect::Emit(intent.into_event()))
            .collect();

        if let Some(previous) = previous {
            self.typing.clear(&previous);
            for cid in self.outbox.drop_room(&previous) {
                tracing::debug!(client_id = %cid, room_id = %previous, "dropping unacknowledged send");
            }
        }
        self.store.reset(room.clone());
        self.history_in_flight = None;
        self.has_older = false;
        self.next_older_page = 2;

        if let Some(room) = room {
            tracing::info!(room_id = %room, "active room changed");
            effects.push(self.request_history(room, 1));
        }
        effects
    }

    /// Send `content` to the active room.
    ///
    /// # Errors
    ///
    /// Rejects blank or oversized content, a missing active room, and sends
    /// while disconnected.
    pub fn send(&mut self, content: &str, now: Instant) -> Result<Vec<Effect>, ChatError> {
        let content = validate_content(content)?;
        let room = self
            .membership
            .active_room()
            .cloned()
            .ok_or(ChatError::NoActiveRoom)?;
        if !self.connected {
            return Err(ChatError::NotConnected);
        }
        let client_id = ClientMessageId::new();
        self.store.push_pending(client_id, content, Utc::now());
        self.throttle.reset(&room);
        let event = self.outbox.track(client_id, room, content, now);
        Ok(vec![Effect::Emit(event)])
    }

    /// Re-send a failed message; the most recent one when `client_id` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// [`ChatError::UnknownPendingMessage`] when there is nothing to retry,
    /// [`ChatError::NotConnected`] while disconnected.
    pub fn retry(
        &mut self,
        client_id: Option<ClientMessageId>,
        now: Instant,
    ) -> Result<Vec<Effect>, ChatError> {
        let client_id = client_id
            .or_else(|| self.outbox.latest_failed())
            .ok_or(ChatError::UnknownPendingMessage)?;
        if !self.connected {
            return Err(ChatError::NotConnected);
        }
        let event = self
            .outbox
            .retry(client_id, now)
            .ok_or(ChatError::UnknownPendingMessage)?;
        self.store.mark_pending(client_id);
        Ok(vec![Effect::Emit(event)])
    }

    /// The local user is typing in the active room.
    pub fn local_typing(&mut self, now: Instant) -> Vec<Effect> {
        if !self.connected {
            return Vec::new();
        }
        match self.membership.active_room() {
            Some(room) if self.throttle.should_emit(room, now) => {
                vec![Effect::Emit(ClientEvent::Typing(room.clone()))]
            }
            _ => Vec::new(),
        }
    }

    /// Ask for the next older history page of the active room.
    pub fn load_older(&mut self) -> Vec<Effect> {
        let Some(room) = self.membership.active_room().cloned() else {
            return vec![Effect::Notify(Notice::Info("no room selected".into()))];
        };
        if self.history_in_flight.is_some() {
            return Vec::new();
        }
        if !self.has_older {
            return vec![Effect::Notify(Notice::Info("no older messages".into()))];
        }
        let page = self.next_older_page;
        vec![self.request_history(room, page)]
    }

    /// Fetch the room list.
    pub fn refresh_rooms(&mut self) -> Vec<Effect> {
        self.request_rooms().into_iter().collect()
    }

    /// Create (or open) a direct room with `user`.
    #[must_use]
    pub fn create_room(&self, user: UserId) -> Vec<Effect> {
        vec![Effect::CreateRoom(user)]
    }

    /// Rename a room.
    ///
    /// # Errors
    ///
    /// Rejects blank names and rooms not in the list.
    pub fn rename_room(&self, room: RoomId, name: &str) -> Result<Vec<Effect>, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyName);
        }
        if !self.rooms.contains(&room) {
            return Err(ChatError::UnknownRoom(room));
        }
        Ok(vec![Effect::RenameRoom {
            room,
            name: name.to_string(),
        }])
    }

    /// Delete a room.
    ///
    /// # Errors
    ///
    /// [`ChatError::UnknownRoom`] for rooms not in the list.
    pub fn delete_room(&self, room: RoomId) -> Result<Vec<Effect>, ChatError> {
        if !self.rooms.contains(&room) {
            return Err(ChatError::UnknownRoom(room));
        }
        Ok(vec![Effect::DeleteRoom(room)])
    }

    /// New search input. A blank query clears the results at once.
    pub fn search_input(&mut self, query: &str, now: Instant) {
        if self.search.input(query, now) {
            self.search_results.clear();
            self.search_has_more = false;
        }
    }

    /// Ask for the next page of search results. Nothing is requested while
    /// a page is still loading.
    pub fn search_more(&mut self) -> Vec<Effect> {
        if !self.search_has_more {
            return Vec::new();
        }
        self.search
            .load_more()
            .map(|request| self.search_effect(request))
            .into_iter()
            .collect()
    }

    // ---- server events ----

    /// Apply one event from the live connection.
    pub fn handle_server_event(&mut self, event: ServerEvent, now: Instant) -> Vec<Effect> {
        match event {
            ServerEvent::ReceiveMessage(message) => {
                let mut effects = Vec::new();
                if let Some(cid) = message.client_id
                    && self.outbox.confirm(cid)
                {
                    tracing::debug!(client_id = %cid, "send acknowledged");
                }
                if !message.is_from(&self.me) {
                    self.typing.clear(&message.room_id);
                }
                if !self.rooms.record_latest_message(&message) && !self.rooms.contains(&message.room_id) {
                    tracing::debug!(room_id = %message.room_id, "message for unknown room, refreshing list");
                    effects.extend(self.request_rooms());
                }
                match self.store.append_live(message) {
                    AppendOutcome::Duplicate => tracing::debug!("duplicate delivery absorbed"),
                    AppendOutcome::OtherRoom => tracing::trace!("message for inactive room"),
                    AppendOutcome::Appended | AppendOutcome::Reconciled => {}
                }
                effects
            }
            ServerEvent::Typing { room_id } => {
                if let Some(room) = room_id.or_else(|| self.membership.active_room().cloned()) {
                    self.typing.signal(room, now);
                }
                Vec::new()
            }
            ServerEvent::ConnectError(detail) => {
                tracing::warn!(detail = %detail, "connect_error reached the core");
                Vec::new()
            }
        }
    }

    // ---- request completions ----

    /// A history fetch finished. Stale tickets are discarded.
    pub fn history_loaded(&mut self, ticket: u64, result: Result<HistoryPage, ApiError>) -> Vec<Effect> {
        let Some(request) = self.history_in_flight.take_if(|r| r.ticket == ticket) else {
            tracing::debug!(ticket, "discarding stale history completion");
            return Vec::new();
        };
        if !self.membership.is_active(&request.room) {
            return Vec::new();
        }
        match result {
            Ok(page) => {
                if request.page <= 1 {
                    self.store.load_history(&request.room, page.messages);
                    if self.next_older_page <= 2 {
                        self.has_older = page.has_more;
                    }
                } else {
                    self.store.prepend_older(&request.room, page.messages);
                    self.next_older_page = request.page + 1;
                    self.has_older = page.has_more;
                }
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(room_id = %request.room, error = %e, "history fetch failed");
                vec![Effect::Notify(Notice::Warning(format!(
                    "could not load history: {e}"
                )))]
            }
        }
    }

    /// The room list arrived.
    ///
    /// Rooms created, renamed or deleted locally while the fetch was
    /// running keep their local state.
    pub fn rooms_loaded(&mut self, result: Result<Vec<RoomSummary>, ApiError>) -> Vec<Effect> {
        let fetch = self.rooms_in_flight.take().unwrap_or_default();
        let mut effects = Vec::new();
        match result {
            Ok(summaries) => {
                let kept: Vec<Room> = fetch
                    .touched
                    .iter()
                    .filter_map(|id| self.rooms.get(id).cloned())
                    .collect();
                let rooms = summaries
                    .into_iter()
                    .filter(|s| !fetch.deleted.contains(&s.id))
                    .map(|s| Room::from_summary(s, &self.me))
                    .collect();
                self.rooms.replace_all(rooms);
                for room in kept {
                    tracing::debug!(room_id = %room.id, "keeping room changed during fetch");
                    self.rooms.upsert_room(room);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "room list fetch failed");
                effects.push(Effect::Notify(Notice::Warning(format!(
                    "could not load rooms: {e}"
                ))));
            }
        }
        if fetch.refetch {
            effects.extend(self.request_rooms());
        }
        effects
    }

    /// A room was created. It is listed but not activated.
    pub fn room_created(&mut self, result: Result<RoomSummary, ApiError>) -> Vec<Effect> {
        match result {
            Ok(summary) => {
                let room = Room::from_summary(summary, &self.me);
                let notice = Notice::Info(format!("room '{}' ready ({})", room.name, room.id));
                self.touch_room(&room.id);
                self.rooms.upsert_room(room);
                vec![Effect::Notify(notice)]
            }
            Err(e) => vec![Effect::Notify(Notice::Warning(format!(
                "could not create room: {e}"
            )))],
        }
    }

    /// A room was renamed.
    pub fn room_renamed(&mut self, room: &RoomId, result: Result<RoomSummary, ApiError>) -> Vec<Effect> {
        match result {
            Ok(summary) => {
                let renamed = Room::from_summary(summary, &self.me);
                self.touch_room(room);
                if !self.rooms.rename_room(room, renamed.name.clone()) {
                    self.rooms.upsert_room(renamed);
                }
                Vec::new()
            }
            Err(e) => vec![Effect::Notify(Notice::Warning(format!(
                "could not rename room: {e}"
            )))],
        }
    }

    /// A room deletion finished.
    ///
    /// Deleting the active room first clears the selection (leaving the
    /// room) and the visible messages, then removes it from the list.
    pub fn room_deleted(&mut self, room: &RoomId, result: Result<(), ApiError>) -> Vec<Effect> {
        if let Err(e) = result {
            return vec![Effect::Notify(Notice::Warning(format!(
                "could not delete room: {e}"
            )))];
        }
        let mut effects = Vec::new();
        if self.membership.is_active(room) {
            effects = self.select_room(None);
        }
        self.typing.clear(room);
        self.outbox.drop_room(room);
        if let Some(fetch) = self.rooms_in_flight.as_mut() {
            fetch.deleted.insert(room.clone());
        }
        if let Some(removed) = self.rooms.remove_room(room) {
            effects.push(Effect::Notify(Notice::Info(format!(
                "room '{}' deleted",
                removed.name
            ))));
        }
        effects
    }

    /// A search finished. Superseded results are dropped.
    pub fn search_loaded(
        &mut self,
        request: &SearchRequest,
        result: Result<UserPage, ApiError>,
    ) -> Vec<Effect> {
        if !self.search.finish(request.seq, result.is_ok()) {
            tracing::debug!(seq = request.seq, "discarding superseded search results");
            return Vec::new();
        }
        match result {
            Ok(page) => {
                if request.page <= 1 {
                    self.search_results = page.users;
                } else {
                    self.search_results.extend(page.users);
                }
                self.search_has_more = page.has_more;
                Vec::new()
            }
            Err(e) => vec![Effect::Notify(Notice::Warning(format!(
                "search failed: {e}"
            )))],
        }
    }

    // ---- time ----

    /// Timer tick: expire typing state and unacknowledged sends, and issue a
    /// due search.
    pub fn poll(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        for room in self.typing.expire(now) {
            tracing::trace!(room_id = %room, "typing expired");
        }
        for cid in self.outbox.expire(now) {
            tracing::warn!(client_id = %cid, "send not acknowledged in time");
            self.store.mark_failed(cid);
            effects.push(Effect::Notify(Notice::Warning(
                "message not delivered; /retry to send again".into(),
            )));
        }
        if let Some(request) = self.search.poll(now) {
            effects.push(self.search_effect(request));
        }
        effects
    }

    /// Earliest instant at which [`poll`](Self::poll) has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.typing.next_expiry(),
            self.outbox.next_deadline(),
            self.search.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Presentation view at `now`.
    #[must_use]
    pub fn snapshot(&self, connection: ConnectionState, now: Instant) -> ChatSnapshot {
        let active_room = self.membership.active_room().cloned();
        ChatSnapshot {
            connection,
            connection_error: None,
            peer_typing: active_room
                .as_ref()
                .is_some_and(|room| self.typing.is_active(room, now)),
            active_room,
            rooms: self.rooms.rooms().to_vec(),
            messages: self.store.messages().to_vec(),
            loading_history: self.history_in_flight.is_some(),
            has_older: self.has_older,
            search_query: self.search.query().to_string(),
            search_results: self.search_results.clone(),
            search_has_more: self.search_has_more,
        }
    }

    fn request_history(&mut self, room: RoomId, page: u32) -> Effect {
        self.next_ticket += 1;
        self.history_in_flight = Some(HistoryInFlight {
            ticket: self.next_ticket,
            room: room.clone(),
            page,
        });
        Effect::FetchHistory {
            ticket: self.next_ticket,
            room,
            page,
            limit: self.config.history_page_size,
        }
    }

    /// Fetch the room list unless a fetch is already running, in which case
    /// one more fetch follows it.
    fn request_rooms(&mut self) -> Option<Effect> {
        if let Some(fetch) = self.rooms_in_flight.as_mut() {
            fetch.refetch = true;
            return None;
        }
        self.rooms_in_flight = Some(RoomsInFlight::default());
        Some(Effect::FetchRooms)
    }

    fn touch_room(&mut self, room: &RoomId) {
        if let Some(fetch) = self.rooms_in_flight.as_mut() {
            fetch.touched.push(room.clone());
            fetch.deleted.remove(room);
        }
    }

    const fn search_effect(&self, request: SearchRequest) -> Effect {
        Effect::Search {
            request,
            limit: self.config.search_page_size,
        }
    }
}
