//! Session connection: one authenticated streaming connection per user.
//!
//! [`SessionConnection`] owns the [`Connector`], the [`Credential`] and the
//! current [`Transport`]. It is owned by the driver task; there is no
//! process-wide connection. Each established connection gets a new epoch so
//! that loss reports from an earlier connection can be told apart.

use std::fmt;
use std::sync::Arc;

use zeroize::ZeroizeOnDrop;

use aether_proto::event::ClientEvent;

use crate::transport::{Connector, Transport, TransportError};

/// Opaque bearer token presented on the handshake and on API calls.
///
/// The token is zeroized on drop and never printed by `Debug`.
#[derive(ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token issued by the authentication service.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building request headers.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Streaming connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport and no connection attempt in progress.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Transport established.
    Connected,
    /// The last handshake failed or the connection broke abnormally.
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "error",
        };
        f.write_str(label)
    }
}

/// One user's streaming connection.
pub struct SessionConnection<C: Connector> {
    connector: C,
    credential: Credential,
    state: ConnectionState,
    transport: Option<Arc<C::Transport>>,
    epoch: u64,
    last_error: Option<String>,
}

impl<C: Connector> SessionConnection<C> {
    /// Create a disconnected session.
    pub const fn new(connector: C, credential: Credential) -> Self {
        Self {
            connector,
            credential,
            state: ConnectionState::Disconnected,
            transport: None,
            epoch: 0,
            last_error: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Epoch of the current (or most recent) connection.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Description of the most recent failure, cleared on success.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The credential presented on the handshake.
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether a transport is established.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Shared handle to the live transport, for the reader task.
    #[must_use]
    pub fn transport(&self) -> Option<Arc<C::Transport>> {
        self.transport.clone()
    }

    /// Establish the transport.
    ///
    /// Returns `Ok(true)` when a new connection was made and `Ok(false)` when
    /// already connected (no-op).
    ///
    /// # Errors
    ///
    /// Returns the connector's error; the state becomes
    /// [`ConnectionState::Errored`].
    pub async fn connect(&mut self) -> Result<bool, TransportError> {
        if self.is_connected() && self.transport.is_some() {
            tracing::debug!(epoch = self.epoch, "connect ignored, already connected");
            return Ok(false);
        }
        self.state = ConnectionState::Connecting;
        match self.connector.connect(&self.credential).await {
            Ok(transport) => {
                self.epoch += 1;
                self.transport = Some(Arc::new(transport));
                self.state = ConnectionState::Connected;
                self.last_error = None;
                tracing::info!(epoch = self.epoch, "session connected");
                Ok(true)
            }
            Err(e) => {
                self.state = ConnectionState::Errored;
                self.last_error = Some(e.to_string());
                tracing::warn!(error = %e, "session connect failed");
                Err(e)
            }
        }
    }

    /// Close the transport, if any, and become disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
            tracing::info!(epoch = self.epoch, "session disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Record that the connection of `epoch` ended with `error`.
    ///
    /// Returns `false` (and changes nothing) when `epoch` is not the current
    /// connection. A clean close leads to `Disconnected`, anything else to
    /// `Errored`.
    pub fn transport_lost(&mut self, epoch: u64, error: &TransportError) -> bool {
        if epoch != self.epoch || self.transport.is_none() {
            tracing::debug!(epoch, current = self.epoch, "ignoring stale transport loss");
            return false;
        }
        self.transport = None;
        self.state = match error {
            TransportError::ConnectionClosed => ConnectionState::Disconnected,
            other => {
                self.last_error = Some(other.to_string());
                ConnectionState::Errored
            }
        };
        tracing::info!(epoch, state = %self.state, error = %error, "transport lost");
        true
    }

    /// Send one event over the live transport.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] without a transport, otherwise the
    /// transport's own error.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let transport = self.transport.as_ref().ok_or(TransportError::NotConnected)?;
        transport.send(event).await
    }
}
