//! Streaming transport abstraction for `Aether`.
//!
//! Defines the [`Transport`] trait for one live connection and the
//! [`Connector`] trait that performs the authenticated handshake.
//! Concrete implementations:
//! - [`ws::WsConnector`]: WebSocket connection to the chat server
//! - [`loopback::LoopbackConnector`]: in-process pair for testing

pub mod loopback;
pub mod ws;

use aether_proto::codec::CodecError;
use aether_proto::event::{ClientEvent, ServerEvent};

use crate::session::Credential;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed by either side.
    #[error("connection closed")]
    ConnectionClosed,

    /// No transport is established.
    #[error("not connected")]
    NotConnected,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server refused the handshake or reported a connection error.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The server endpoint could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// A frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O or WebSocket error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Returns `true` if retrying the handshake cannot succeed without a
    /// new credential.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// One established live connection.
///
/// Implementations carry protocol events; framing and JSON encoding happen
/// inside the implementation. All methods take `&self` so a reader task can
/// hold the transport in an [`Arc`](std::sync::Arc) while the owner sends.
pub trait Transport: Send + Sync + 'static {
    /// Send one event to the server.
    ///
    /// Returns `Ok(())` once the frame is handed to the connection. This does
    /// NOT mean the server processed it; message delivery is confirmed by
    /// the server's echo.
    fn send(
        &self,
        event: &ClientEvent,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next server event.
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection has
    /// ended and [`TransportError::Rejected`] when the server sent
    /// `connect_error`.
    fn recv(&self) -> impl std::future::Future<Output = Result<ServerEvent, TransportError>> + Send;

    /// Whether the connection is still open.
    fn is_connected(&self) -> bool;

    /// Close the connection. Safe to call more than once.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Establishes authenticated connections.
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful handshake.
    type Transport: Transport;

    /// Open a new connection, presenting `credential` during the handshake.
    fn connect(
        &self,
        credential: &Credential,
    ) -> impl std::future::Future<Output = Result<Self::Transport, TransportError>> + Send;
}
