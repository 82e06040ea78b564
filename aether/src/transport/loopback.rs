//! Loopback transport for testing.
//!
//! [`LoopbackConnector`] hands out in-process connections backed by
//! [`tokio::sync::mpsc`] channels. Every successful connect also yields a
//! [`LoopbackServer`] on the connector's accept channel, which a test uses to
//! play the chat server: read the client's events and push server events.
//! Frames cross the channel JSON-encoded, exactly as on the wire.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use aether_proto::codec;
use aether_proto::event::{ClientEvent, ServerEvent};

use super::{Connector, Transport, TransportError};
use crate::session::Credential;

/// Channel capacity for each direction of a loopback connection.
const LOOPBACK_BUFFER: usize = 64;

#[derive(Debug, Default)]
struct Policy {
    /// Token the handshake must present; `None` accepts anything.
    expected_token: Option<String>,
    /// Reasons for the next handshakes to refuse, in order.
    forced_rejections: VecDeque<String>,
    /// Number of upcoming connects that fail as unreachable.
    unreachable: u32,
}

/// In-process [`Connector`] producing [`LoopbackTransport`]s.
///
/// Cloning shares the handshake policy, so a test can keep a clone to
/// inject failures after the original has been moved into the client.
#[derive(Clone)]
pub struct LoopbackConnector {
    accepted: mpsc::UnboundedSender<LoopbackServer>,
    policy: Arc<parking_lot::Mutex<Policy>>,
}

impl LoopbackConnector {
    /// Create a connector and the receiver on which accepted server ends
    /// arrive, one per successful handshake.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted: tx,
            policy: Arc::new(parking_lot::Mutex::new(Policy::default())),
        };
        (connector, rx)
    }

    /// Only accept handshakes presenting `token`.
    #[must_use]
    pub fn with_expected_token(self, token: impl Into<String>) -> Self {
        self.policy.lock().expected_token = Some(token.into());
        self
    }

    /// Refuse the next handshake with `reason`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.policy.lock().forced_rejections.push_back(reason.into());
    }

    /// Make the next `count` handshakes fail as if the server were down.
    pub fn fail_next(&self, count: u32) {
        self.policy.lock().unreachable += count;
    }
}

impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self, credential: &Credential) -> Result<LoopbackTransport, TransportError> {
        {
            let mut policy = self.policy.lock();
            if policy.unreachable > 0 {
                policy.unreachable -= 1;
                return Err(TransportError::Unreachable("loopback".to_string()));
            }
            if let Some(reason) = policy.forced_rejections.pop_front() {
                return Err(TransportError::Rejected(reason));
            }
            if let Some(expected) = &policy.expected_token
                && expected != credential.as_str()
            {
                return Err(TransportError::Rejected("invalid credential".to_string()));
            }
        }

        let (to_server_tx, to_server_rx) = mpsc::channel(LOOPBACK_BUFFER);
        let (to_client_tx, to_client_rx) = mpsc::channel(LOOPBACK_BUFFER);

        let server = LoopbackServer {
            credential: credential.as_str().to_string(),
            from_client: to_server_rx,
            to_client: to_client_tx,
        };
        self.accepted
            .send(server)
            .map_err(|_| TransportError::Unreachable("loopback listener dropped".to_string()))?;

        Ok(LoopbackTransport {
            tx: parking_lot::Mutex::new(Some(to_server_tx)),
            rx: Mutex::new(to_client_rx),
            open: AtomicBool::new(true),
        })
    }
}

/// Client end of a loopback connection.
pub struct LoopbackTransport {
    /// Outgoing frames; taken on close so the server end observes it.
    tx: parking_lot::Mutex<Option<mpsc::Sender<String>>>,
    /// Incoming frames pushed by the [`LoopbackServer`].
    rx: Mutex<mpsc::Receiver<String>>,
    open: AtomicBool,
}

impl Transport for LoopbackTransport {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let frame = codec::encode_client(event)?;
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<ServerEvent, TransportError> {
        let mut rx = self.rx.lock().await;
        loop {
            if !self.open.load(Ordering::Relaxed) {
                return Err(TransportError::ConnectionClosed);
            }
            let Some(frame) = rx.recv().await else {
                self.open.store(false, Ordering::Relaxed);
                return Err(TransportError::ConnectionClosed);
            };
            match codec::decode_server(&frame) {
                Ok(ServerEvent::ConnectError(detail)) => {
                    self.open.store(false, Ordering::Relaxed);
                    return Err(TransportError::Rejected(detail));
                }
                Ok(event) => return Ok(event),
                Err(e) => tracing::warn!(err = %e, "malformed loopback frame, skipping"),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::Relaxed) && self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        self.tx.lock().take();
    }
}

/// Server end of a loopback connection, driven by tests.
///
/// Dropping it closes the connection from the server side.
pub struct LoopbackServer {
    credential: String,
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

impl LoopbackServer {
    /// Credential the client presented during the handshake.
    #[must_use]
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Wait for the next decodable client event; `None` once the client
    /// closed the connection.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        while let Some(frame) = self.from_client.recv().await {
            match codec::decode_client(&frame) {
                Ok(event) => return Some(event),
                Err(e) => tracing::warn!(err = %e, "malformed client frame, skipping"),
            }
        }
        None
    }

    /// Return an already-queued client event without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        while let Ok(frame) = self.from_client.try_recv() {
            if let Ok(event) = codec::decode_client(&frame) {
                return Some(event);
            }
        }
        None
    }

    /// Push a server event to the client. Returns `false` if the client end
    /// is gone.
    pub async fn push(&self, event: &ServerEvent) -> bool {
        match codec::encode_server(event) {
            Ok(frame) => self.push_raw(frame).await,
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode loopback server event");
                false
            }
        }
    }

    /// Push an arbitrary text frame, bypassing the codec.
    pub async fn push_raw(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).await.is_ok()
    }
}
