//! Request/response chat API.
//!
//! [`ChatApi`] covers the paginated history read and room management calls
//! that sit beside the streaming connection. Implementations:
//! - [`http::HttpChatApi`]: the server's REST endpoints via `reqwest`
//! - [`memory::InMemoryApi`]: deterministic in-process backend for tests

pub mod http;
pub mod memory;

use aether_proto::message::{Message, RoomId, UserId, UserRef};
use aether_proto::room::RoomSummary;

/// Errors from the request/response API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success HTTP status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The server reported `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The addressed room or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend could not serve the request.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// An endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// One page of room history, newest first as the server returns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    /// Whether an older page may exist.
    pub has_more: bool,
}

/// One page of user search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<UserRef>,
    pub has_more: bool,
}

/// Request/response operations the synchronization core depends on.
///
/// All calls are authenticated by the implementation; the core treats each
/// as a single attempt.
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch page `page` (1-based, 1 = newest) of `room`'s history.
    fn fetch_history(
        &self,
        room: &RoomId,
        page: u32,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<HistoryPage, ApiError>> + Send;

    /// Fetch the user's rooms.
    fn fetch_rooms(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RoomSummary>, ApiError>> + Send;

    /// Create (or open) a direct room with `user`.
    fn create_room(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<RoomSummary, ApiError>> + Send;

    /// Rename a room.
    fn rename_room(
        &self,
        room: &RoomId,
        name: &str,
    ) -> impl std::future::Future<Output = Result<RoomSummary, ApiError>> + Send;

    /// Delete a room.
    fn delete_room(
        &self,
        room: &RoomId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Search the user directory.
    fn search_users(
        &self,
        query: &str,
        page: u32,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<UserPage, ApiError>> + Send;
}
