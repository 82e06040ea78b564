//! WebSocket transport to the chat server.
//!
//! [`WsConnector`] performs the upgrade with the session credential in an
//! `Authorization: Bearer` header. The resulting [`WsTransport`] splits the
//! stream: sends go through a shared write half, and a background reader
//! task decodes text frames into [`ServerEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use aether_proto::codec;
use aether_proto::event::{ClientEvent, ServerEvent};

use super::{Connector, Transport, TransportError};
use crate::session::Credential;

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer between the reader task and [`WsTransport::recv`].
const INCOMING_BUFFER: usize = 256;

/// Opens [`WsTransport`]s to one server URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Connector for `url` (`ws://` or `wss://`) with the default timeout.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The server URL this connector dials.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    /// Perform the WebSocket upgrade and spawn the reader task.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake exceeds the timeout.
    /// - [`TransportError::Rejected`] if the server answers 401/403.
    /// - [`TransportError::Unreachable`] if the address refuses connections.
    /// - [`TransportError::Io`] for TLS and other handshake failures.
    async fn connect(&self, credential: &Credential) -> Result<WsTransport, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
            .map_err(|_| TransportError::Rejected("credential is not a valid header".into()))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(request))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "WebSocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, err = %e, "WebSocket connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        tracing::info!(url = %self.url, "WebSocket connected");
        Ok(WsTransport {
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            connected,
            reader_handle,
        })
    }
}

/// One live WebSocket connection.
pub struct WsTransport {
    /// Write half, shared for concurrent sends.
    ws_sender: Arc<Mutex<WsSender>>,
    /// Decoded events (or the terminal error) from the reader task.
    incoming: Mutex<mpsc::Receiver<Result<ServerEvent, TransportError>>>,
    connected: Arc<AtomicBool>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl Transport for WsTransport {
    async fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = codec::encode_client(event)?;

        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::text(frame)).await.map_err(|e| {
            tracing::warn!(err = %e, event = event.name(), "WebSocket send failed");
            self.connected.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    async fn recv(&self) -> Result<ServerEvent, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) {
        if !self.connected.swap(false, Ordering::Relaxed) {
            return;
        }
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(err = %e, "WebSocket close handshake failed");
        }
        self.reader_handle.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Read frames until the socket ends.
///
/// Text frames are decoded; malformed or unknown ones are logged and
/// skipped. A `connect_error` frame is forwarded as
/// [`TransportError::Rejected`] and ends the loop.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<Result<ServerEvent, TransportError>>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match codec::decode_server(text.as_str()) {
                Ok(ServerEvent::ConnectError(detail)) => {
                    tracing::warn!(detail = %detail, "server reported connect_error");
                    let _ = tx.send(Err(TransportError::Rejected(detail))).await;
                    break;
                }
                Ok(event) => {
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!("ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("WebSocket reader task exiting");
}

/// Map a `tokio_tungstenite` handshake error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) {
                TransportError::Unreachable(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                TransportError::Rejected(format!("server answered {status}"))
            } else {
                TransportError::Io(std::io::Error::other(format!(
                    "handshake HTTP error: status {status}"
                )))
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        other => TransportError::Io(std::io::Error::other(format!(
            "WebSocket connection error: {other}"
        ))),
    }
}
