//! In-memory [`ChatApi`] for tests and offline runs.
//!
//! Holds rooms, per-room history and a user directory behind a
//! [`parking_lot::Mutex`]. Clones share state, so a test keeps one clone to
//! seed data and inspect the request log while the driver owns another.
//! Latency and one-shot failures can be injected to exercise stale and
//! failed completions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use aether_proto::message::{Message, RoomId, UserId, UserRef};
use aether_proto::room::RoomSummary;

use super::{ApiError, ChatApi, HistoryPage, UserPage};

/// A request received by [`InMemoryApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    FetchHistory { room: RoomId, page: u32, limit: u32 },
    FetchRooms,
    CreateRoom(UserId),
    RenameRoom { room: RoomId, name: String },
    DeleteRoom(RoomId),
    SearchUsers { query: String, page: u32, limit: u32 },
}

#[derive(Debug, Default)]
struct State {
    me: Option<UserRef>,
    rooms: Vec<RoomSummary>,
    /// Oldest first.
    history: HashMap<RoomId, Vec<Message>>,
    users: Vec<UserRef>,
    next_room: u64,
    failures: VecDeque<String>,
    latency: Duration,
    room_latency: HashMap<RoomId, Duration>,
    calls: Vec<ApiCall>,
}

/// Shared in-process backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApi {
    state: Arc<Mutex<State>>,
}

fn page_bounds(total: usize, page: u32, limit: u32) -> (usize, usize) {
    let limit = limit as usize;
    let start = (page.max(1) as usize - 1).saturating_mul(limit).min(total);
    let end = start.saturating_add(limit).min(total);
    (start, end)
}

impl InMemoryApi {
    /// A backend serving requests on behalf of `me`.
    #[must_use]
    pub fn new(me: UserRef) -> Self {
        let api = Self::default();
        {
            let mut state = api.state.lock();
            state.users.push(me.clone());
            state.me = Some(me);
        }
        api
    }

    /// Add a user to the directory.
    pub fn add_user(&self, user: UserRef) {
        self.state.lock().users.push(user);
    }

    /// Add a room to the user's list.
    pub fn add_room(&self, room: RoomSummary) {
        let mut state = self.state.lock();
        state.history.entry(room.id.clone()).or_default();
        state.rooms.push(room);
    }

    /// Append a stored message to a room's history.
    pub fn add_message(&self, message: Message) {
        self.state
            .lock()
            .history
            .entry(message.room_id.clone())
            .or_default()
            .push(message);
    }

    /// Make the next request fail with [`ApiError::Unavailable`].
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.state.lock().failures.push_back(reason.into());
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Delay history responses for `room` by `latency`.
    pub fn set_room_latency(&self, room: RoomId, latency: Duration) {
        self.state.lock().room_latency.insert(room, latency);
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    /// Queries of the search requests received so far.
    #[must_use]
    pub fn search_queries(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ApiCall::SearchUsers { query, .. } => Some(query.clone()),
                _ => None,
            })
            .collect()
    }

    /// Rooms currently stored.
    #[must_use]
    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.state.lock().rooms.clone()
    }

    /// Log the call and take the injected delay and failure, if any.
    fn begin(&self, call: ApiCall) -> (Duration, Option<String>) {
        let mut state = self.state.lock();
        let delay = match &call {
            ApiCall::FetchHistory { room, .. } => {
                state.room_latency.get(room).copied().unwrap_or(state.latency)
            }
            _ => state.latency,
        };
        state.calls.push(call);
        (delay, state.failures.pop_front())
    }

    async fn enter(&self, call: ApiCall) -> Result<(), ApiError> {
        let (delay, failure) = self.begin(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), |reason| Err(ApiError::Unavailable(reason)))
    }
}

impl ChatApi for InMemoryApi {
    async fn fetch_history(
        &self,
        room: &RoomId,
        page: u32,
        limit: u32,
    ) -> Result<HistoryPage, ApiError> {
        self.enter(ApiCall::FetchHistory {
            room: room.clone(),
            page,
            limit,
        })
        .await?;
        let state = self.state.lock();
        let history = state
            .history
            .get(room)
            .ok_or_else(|| ApiError::NotFound(room.to_string()))?;
        let (start, end) = page_bounds(history.len(), page, limit);
        let messages: Vec<Message> = history.iter().rev().skip(start).take(end - start).cloned().collect();
        Ok(HistoryPage {
            messages,
            has_more: end < history.len(),
        })
    }

    async fn fetch_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        self.enter(ApiCall::FetchRooms).await?;
        let state = self.state.lock();
        Ok(state
            .rooms
            .iter()
            .cloned()
            .map(|mut room| {
                room.latest_message = state.history.get(&room.id).and_then(|h| h.last().cloned());
                room
            })
            .collect())
    }

    async fn create_room(&self, user: &UserId) -> Result<RoomSummary, ApiError> {
        self.enter(ApiCall::CreateRoom(user.clone())).await?;
        let mut state = self.state.lock();
        if let Some(existing) = state
            .rooms
            .iter()
            .find(|r| !r.is_group && r.users.iter().any(|u| &u.id == user))
        {
            return Ok(existing.clone());
        }
        let other = state
            .users
            .iter()
            .find(|u| &u.id == user)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(user.to_string()))?;
        state.next_room += 1;
        let id = RoomId::new(format!("room-{}", state.next_room));
        let users = state.me.iter().cloned().chain(std::iter::once(other)).collect();
        let room = RoomSummary {
            id: id.clone(),
            chat_name: Some("sender".to_string()),
            is_group: false,
            users,
            latest_message: None,
        };
        state.history.insert(id, Vec::new());
        state.rooms.insert(0, room.clone());
        Ok(room)
    }

    async fn rename_room(&self, room: &RoomId, name: &str) -> Result<RoomSummary, ApiError> {
        self.enter(ApiCall::RenameRoom {
            room: room.clone(),
            name: name.to_string(),
        })
        .await?;
        if name.trim().is_empty() {
            return Err(ApiError::Rejected("chat name is required".into()));
        }
        let mut state = self.state.lock();
        let summary = state
            .rooms
            .iter_mut()
            .find(|r| &r.id == room)
            .ok_or_else(|| ApiError::NotFound(room.to_string()))?;
        summary.chat_name = Some(name.to_string());
        Ok(summary.clone())
    }

    async fn delete_room(&self, room: &RoomId) -> Result<(), ApiError> {
        self.enter(ApiCall::DeleteRoom(room.clone())).await?;
        let mut state = self.state.lock();
        let idx = state
            .rooms
            .iter()
            .position(|r| &r.id == room)
            .ok_or_else(|| ApiError::NotFound(room.to_string()))?;
        state.rooms.remove(idx);
        state.history.remove(room);
        Ok(())
    }

    async fn search_users(&self, query: &str, page: u32, limit: u32) -> Result<UserPage, ApiError> {
        self.enter(ApiCall::SearchUsers {
            query: query.to_string(),
            page,
            limit,
        })
        .await?;
        let state = self.state.lock();
        let needle = query.to_lowercase();
        let me = state.me.as_ref().map(|m| &m.id);
        let matches: Vec<&UserRef> = state
            .users
            .iter()
            .filter(|u| Some(&u.id) != me && u.username.to_lowercase().contains(&needle))
            .collect();
        let (start, end) = page_bounds(matches.len(), page, limit);
        Ok(UserPage {
            users: matches[start..end].iter().map(|u| (*u).clone()).collect(),
            has_more: end < matches.len(),
        })
    }
}
