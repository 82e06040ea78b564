//! Driver that wires the [`ChatCore`] to the streaming transport and the
//! request API.
//!
//! One tokio task owns the core and the [`SessionConnection`] and handles,
//! one at a time:
//!
//! ```text
//! UI ── ChatCommand ──▶ ┌────────┐ ◀── Inbound ── reader task (per epoch)
//!                       │ driver │ ◀── Inbound ── request tasks
//! UI ◀── snapshot/notice└────────┘ ◀── timer (core deadlines, reconnect)
//! ```
//!
//! After every step the driver publishes a [`ChatSnapshot`] on a `watch`
//! channel; [`Notice`]s go out on an mpsc channel.

use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use aether_proto::event::ServerEvent;
use aether_proto::message::{ClientMessageId, RoomId, UserId};
use aether_proto::room::RoomSummary;

use crate::api::{ApiError, ChatApi, HistoryPage, UserPage};
use crate::chat::search::SearchRequest;
use crate::chat::{ChatConfig, ChatCore, ChatSnapshot, Effect, Notice};
use crate::config::{ClientConfig, ReconnectConfig};
use crate::session::{ConnectionState, Credential, SessionConnection};
use crate::transport::{Connector, Transport, TransportError};

/// Default channel capacity for commands, notices and internal events.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Commands sent from the front end to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Establish the connection (no-op when connected).
    Connect,
    /// Close the connection without reconnecting.
    Disconnect,
    /// Switch the active room, or clear it with `None`.
    SelectRoom(Option<RoomId>),
    /// Send text to the active room.
    Send(String),
    /// Re-send a failed message (the latest one when `None`).
    Retry(Option<ClientMessageId>),
    /// The local user is typing.
    Typing,
    LoadOlder,
    RefreshRooms,
    /// Create or open a direct room with a user.
    CreateRoom(UserId),
    RenameRoom {
        room: RoomId,
        name: String,
    },
    DeleteRoom(RoomId),
    /// New search input; debounced before a request is made.
    Search(String),
    SearchMore,
    /// Stop the driver, closing the connection.
    Shutdown,
}

/// Configuration for the driver.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    pub chat: ChatConfig,
    pub reconnect: ReconnectConfig,
    /// Capacity of the command, notice and internal channels.
    pub channel_capacity: usize,
}

impl NetConfig {
    /// Driver settings with default channel capacity.
    #[must_use]
    pub fn new(chat: ChatConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            chat,
            reconnect,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl From<&ClientConfig> for NetConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            chat: config.chat.clone(),
            reconnect: config.reconnect.clone(),
            channel_capacity: config.channel_capacity,
        }
    }
}

/// Front-end side of a running driver.
#[derive(Debug)]
pub struct ClientHandle {
    pub commands: mpsc::Sender<ChatCommand>,
    pub snapshots: watch::Receiver<ChatSnapshot>,
    pub notices: mpsc::Receiver<Notice>,
    pub task: JoinHandle<()>,
}

impl ClientHandle {
    /// Queue a command. Returns `false` once the driver has stopped.
    pub async fn send(&self, command: ChatCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Ask the driver to stop and wait until the connection is closed.
    pub async fn shutdown(self) {
        let _ = self.commands.send(ChatCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "driver task ended abnormally");
        }
    }
}

/// Events fed back into the driver by its own tasks.
#[derive(Debug)]
enum Inbound {
    Server {
        epoch: u64,
        event: ServerEvent,
    },
    Lost {
        epoch: u64,
        error: TransportError,
    },
    History {
        ticket: u64,
        result: Result<HistoryPage, ApiError>,
    },
    Rooms(Result<Vec<RoomSummary>, ApiError>),
    Created(Result<RoomSummary, ApiError>),
    Renamed {
        room: RoomId,
        result: Result<RoomSummary, ApiError>,
    },
    Deleted {
        room: RoomId,
        result: Result<(), ApiError>,
    },
    Searched {
        request: SearchRequest,
        result: Result<UserPage, ApiError>,
    },
}

/// Start the driver for user `me` on the current tokio runtime.
///
/// The driver starts disconnected; send [`ChatCommand::Connect`] to go
/// online. Dropping every command sender has the same effect as
/// [`ChatCommand::Shutdown`].
pub fn spawn_client<C, A>(
    config: NetConfig,
    me: UserId,
    connector: C,
    credential: Credential,
    api: A,
) -> ClientHandle
where
    C: Connector,
    A: ChatApi,
{
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (notice_tx, notice_rx) = mpsc::channel(capacity);
    let (inbox_tx, inbox_rx) = mpsc::channel(capacity);

    let core = ChatCore::new(me, config.chat);
    let (snapshot_tx, snapshot_rx) =
        watch::channel(core.snapshot(ConnectionState::Disconnected, now()));

    let driver = Driver {
        core,
        session: SessionConnection::new(connector, credential),
        api: Arc::new(api),
        inbox: inbox_tx,
        snapshots: snapshot_tx,
        notices: notice_tx,
        reconnect: config.reconnect,
        reconnect_attempt: 0,
        reconnect_at: None,
        reader: None,
        rng: StdRng::from_os_rng(),
    };
    let task = tokio::spawn(driver.run(cmd_rx, inbox_rx));

    ClientHandle {
        commands: cmd_tx,
        snapshots: snapshot_rx,
        notices: notice_rx,
        task,
    }
}

/// A rejected action becomes a warning notice.
fn or_notice<E: std::fmt::Display>(result: Result<Vec<Effect>, E>) -> Vec<Effect> {
    result.unwrap_or_else(|e| vec![Effect::Notify(Notice::Warning(e.to_string()))])
}

/// Current time on the tokio clock, so paused-time tests stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

struct Driver<C: Connector, A: ChatApi> {
    core: ChatCore,
    session: SessionConnection<C>,
    api: Arc<A>,
    inbox: mpsc::Sender<Inbound>,
    snapshots: watch::Sender<ChatSnapshot>,
    notices: mpsc::Sender<Notice>,
    reconnect: ReconnectConfig,
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    reader: Option<JoinHandle<()>>,
    rng: StdRng,
}

impl<C: Connector, A: ChatApi> Driver<C, A> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ChatCommand>,
        mut inbox: mpsc::Receiver<Inbound>,
    ) {
        tracing::info!(user_id = %self.core.me(), "chat driver started");
        loop {
            let deadline = self.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(ChatCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(inbound) = inbox.recv() => self.handle_inbound(inbound).await,
                () = timer => self.on_timer().await,
            }
            self.publish();
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: ChatCommand) {
        tracing::debug!(?command, "command");
        let now = now();
        let effects = match command {
            ChatCommand::Connect => {
                self.reconnect_attempt = 0;
                self.reconnect_at = None;
                self.connect(false).await;
                Vec::new()
            }
            ChatCommand::Disconnect => {
                self.reconnect_at = None;
                self.go_offline().await;
                self.notify(Notice::Info("disconnected".into()));
                Vec::new()
            }
            ChatCommand::SelectRoom(room) => self.core.select_room(room),
            ChatCommand::Send(text) => or_notice(self.core.send(&text, now)),
            ChatCommand::Retry(client_id) => or_notice(self.core.retry(client_id, now)),
            ChatCommand::Typing => self.core.local_typing(now),
            ChatCommand::LoadOlder => self.core.load_older(),
            ChatCommand::RefreshRooms => self.core.refresh_rooms(),
            ChatCommand::CreateRoom(user) => self.core.create_room(user),
            ChatCommand::RenameRoom { room, name } => {
                or_notice(self.core.rename_room(room, &name))
            }
            ChatCommand::DeleteRoom(room) => or_notice(self.core.delete_room(room)),
            ChatCommand::Search(query) => {
                self.core.search_input(&query, now);
                Vec::new()
            }
            ChatCommand::SearchMore => self.core.search_more(),
            ChatCommand::Shutdown => Vec::new(),
        };
        self.apply(effects).await;
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        let effects = match inbound {
            Inbound::Server { epoch, event } => {
                if epoch != self.session.epoch() || !self.session.is_connected() {
                    tracing::debug!(epoch, "dropping event from previous connection");
                    return;
                }
                self.core.handle_server_event(event, now())
            }
            Inbound::Lost { epoch, error } => {
                self.connection_lost(epoch, &error);
                Vec::new()
            }
            Inbound::History { ticket, result } => self.core.history_loaded(ticket, result),
            Inbound::Rooms(result) => self.core.rooms_loaded(result),
            Inbound::Created(result) => self.core.room_created(result),
            Inbound::Renamed { room, result } => self.core.room_renamed(&room, result),
            Inbound::Deleted { room, result } => self.core.room_deleted(&room, result),
            Inbound::Searched { request, result } => self.core.search_loaded(&request, result),
        };
        self.apply(effects).await;
    }

    async fn on_timer(&mut self) {
        let now = now();
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.connect(true).await;
        }
        let effects = self.core.poll(now);
        self.apply(effects).await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.core.next_deadline(), self.reconnect_at]
            .into_iter()
            .flatten()
            .min()
    }

    // ---- connection ----

    async fn connect(&mut self, reconnecting: bool) {
        if self.session.is_connected() {
            self.notify(Notice::Info("already connected".into()));
            return;
        }
        self.snapshots
            .send_replace(self.core.snapshot(ConnectionState::Connecting, now()));

        match self.session.connect().await {
            Ok(false) => {}
            Ok(true) => {
                self.reconnect_attempt = 0;
                self.spawn_reader();
                if reconnecting {
                    self.notify(Notice::Info("reconnected".into()));
                }
                let effects = self.core.on_connected();
                self.apply(effects).await;
            }
            Err(e) => {
                self.notify(Notice::Warning(format!("connection failed: {e}")));
                if reconnecting && !e.is_rejection() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn connection_lost(&mut self, epoch: u64, error: &TransportError) {
        if !self.session.transport_lost(epoch, error) {
            return;
        }
        self.reader = None;
        self.core.on_disconnected();
        self.notify(Notice::Warning(format!("connection lost: {error}")));
        if error.is_rejection() {
            tracing::warn!(error = %error, "server rejected the session, not reconnecting");
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.reconnect.enabled() || self.reconnect_attempt >= self.reconnect.max_attempts {
            tracing::warn!(attempts = self.reconnect_attempt, "giving up on reconnecting");
            self.notify(Notice::Warning(
                "could not reconnect; use /connect to try again".into(),
            ));
            return;
        }
        self.reconnect_attempt += 1;
        let delay = self.reconnect.delay_for(self.reconnect_attempt, &mut self.rng);
        tracing::info!(
            attempt = self.reconnect_attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        self.reconnect_at = Some(now() + delay);
    }

    /// Forward every event of the current connection into the inbox.
    fn spawn_reader(&mut self) {
        let Some(transport) = self.session.transport() else {
            return;
        };
        self.abort_reader();
        let epoch = self.session.epoch();
        let inbox = self.inbox.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(event) => {
                        if inbox.send(Inbound::Server { epoch, event }).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        let _ = inbox.send(Inbound::Lost { epoch, error }).await;
                        break;
                    }
                }
            }
            tracing::debug!(epoch, "reader finished");
        }));
    }

    fn abort_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    async fn go_offline(&mut self) {
        self.abort_reader();
        self.session.disconnect().await;
        self.core.on_disconnected();
    }

    async fn shutdown(mut self) {
        self.reconnect_at = None;
        self.go_offline().await;
        self.publish();
        tracing::info!("chat driver stopped");
    }

    // ---- effects ----

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    if let Err(e) = self.session.send(&event).await {
                        tracing::warn!(event = event.name(), error = %e, "emit failed");
                    }
                }
                Effect::FetchHistory {
                    ticket,
                    room,
                    page,
                    limit,
                } => {
                    let api = Arc::clone(&self.api);
                    self.spawn_request(async move {
                        let result = api.fetch_history(&room, page, limit).await;
                        Inbound::History { ticket, result }
                    });
                }
                Effect::FetchRooms => {
                    let api = Arc::clone(&self.api);
                    self.spawn_request(async move { Inbound::Rooms(api.fetch_rooms().await) });
                }
                Effect::CreateRoom(user) => {
                    let api = Arc::clone(&self.api);
                    self.spawn_request(async move { Inbound::Created(api.create_room(&user).await) });
                }
                Effect::RenameRoom { room, name } => {
                    let api = Arc::clone(&self.api);
                    self.spawn_request(async move {
                        let result = api.rename_room(&room, &name).await;
                        Inbound::Renamed { room, result }
                    });
                }
                Effect::DeleteRoom(room) => {
                    let api = Arc::clone(&self.api);
                    self.spawn_request(async move {
                        let result = api.delete_room(&room).await;
                        Inbound::Deleted { room, result }
                    });
                }
                Effect::Search { request, limit } => {
                    let api = Arc::clone(&self.api);
                    self.spawn_request(async move {
                        let result = api.search_users(&request.query, request.page, limit).await;
                        Inbound::Searched { request, result }
                    });
                }
                Effect::Notify(notice) => self.notify(notice),
            }
        }
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: std::future::Future<Output = Inbound> + Send + 'static,
    {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            // The driver may already be gone.
            let _ = inbox.send(request.await).await;
        });
    }

    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Info(text) => tracing::info!(notice = %text, "notice"),
            Notice::Warning(text) => tracing::warn!(notice = %text, "notice"),
        }
        if let Err(e) = self.notices.try_send(notice) {
            tracing::debug!(error = %e, "notice dropped");
        }
    }

    fn publish(&self) {
        let mut next = self.core.snapshot(self.session.state(), now());
        if next.connection == ConnectionState::Errored {
            next.connection_error = self.session.last_error().map(str::to_string);
        }
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
