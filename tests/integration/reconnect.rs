// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for connection loss, reconnect and shutdown.
//!
//! The loopback server end is dropped to simulate the server closing the
//! connection; `LoopbackConnector::fail_next` / `reject_next` shape the
//! following handshakes.
//!
//! These tests validate:
//! - The active room is rejoined automatically after a reconnect
//! - Messages missed while offline are merged by refetching history
//! - Unreachable servers are retried with backoff, up to a limit
//! - A server rejection is never retried
//! - Disconnect and shutdown close the transport

use std::time::Duration;

use aether::api::memory::{ApiCall, InMemoryApi};
use aether::chat::{ChatConfig, ChatSnapshot, Notice};
use aether::config::ReconnectConfig;
use aether::net::{ChatCommand, ClientHandle, NetConfig, spawn_client};
use aether::session::{ConnectionState, Credential};
use aether::transport::loopback::{LoopbackConnector, LoopbackServer};
use aether_proto::event::{ClientEvent, ServerEvent};
use aether_proto::message::{Message, MessageId, RoomId, UserId, UserRef};
use aether_proto::room::RoomSummary;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

fn message(id: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        room_id: RoomId::new("a"),
        sender: Some(UserRef::new("u2", "bob")),
        content: format!("text {id}"),
        created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        client_id: None,
    }
}

fn seeded_api() -> InMemoryApi {
    let api = InMemoryApi::new(UserRef::new("me", "alice"));
    api.add_room(RoomSummary {
        id: RoomId::new("a"),
        chat_name: Some("General".into()),
        is_group: true,
        users: Vec::new(),
        latest_message: None,
    });
    api.add_message(message("a1", 1));
    api.add_message(message("a2", 2));
    api
}

fn config(max_attempts: u32) -> NetConfig {
    NetConfig {
        chat: ChatConfig::default(),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(80),
            max_attempts,
        },
        channel_capacity: 64,
    }
}

struct Harness {
    handle: ClientHandle,
    connector: LoopbackConnector,
    accepted: UnboundedReceiver<LoopbackServer>,
    api: InMemoryApi,
}

impl Harness {
    fn start(
        max_attempts: u32,
        connector: LoopbackConnector,
        accepted: UnboundedReceiver<LoopbackServer>,
        credential: &str,
    ) -> Self {
        let api = seeded_api();
        let handle = spawn_client(
            config(max_attempts),
            UserId::new("me"),
            connector.clone(),
            Credential::new(credential),
            api.clone(),
        );
        Self {
            handle,
            connector,
            accepted,
            api,
        }
    }

    async fn accept(&mut self) -> LoopbackServer {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for handshake")
            .expect("connector dropped")
    }

    /// Connect and open room `a`, returning the server end.
    async fn online_in_room_a(&mut self) -> LoopbackServer {
        self.handle.send(ChatCommand::Connect).await;
        let mut server = self.accept().await;
        self.handle
            .send(ChatCommand::SelectRoom(Some(RoomId::new("a"))))
            .await;
        assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("a")));
        wait_for(&mut self.handle, "history", |s| s.messages.len() == 2).await;
        server
    }

    fn history_fetches(&self) -> usize {
        self.api
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::FetchHistory { page: 1, .. }))
            .count()
    }
}

fn harness(max_attempts: u32) -> Harness {
    let (connector, accepted) = LoopbackConnector::new();
    Harness::start(max_attempts, connector, accepted, "token")
}

async fn wait_for(
    handle: &mut ClientHandle,
    description: &str,
    pred: impl FnMut(&ChatSnapshot) -> bool,
) -> ChatSnapshot {
    tokio::time::timeout(WAIT, handle.snapshots.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for: {description}"))
        .expect("driver stopped")
        .clone()
}

async fn next_event(server: &mut LoopbackServer) -> ClientEvent {
    tokio::time::timeout(WAIT, server.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client closed the connection")
}

/// Read notices until one contains `needle`.
async fn wait_for_notice(handle: &mut ClientHandle, needle: &str) -> Notice {
    tokio::time::timeout(WAIT, async {
        loop {
            let notice = handle.notices.recv().await.expect("driver stopped");
            if notice.text().contains(needle) {
                return notice;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for notice containing '{needle}'"))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn reconnect_rejoins_active_room_and_merges_missed_messages() {
    let mut h = harness(5);
    let server = h.online_in_room_a().await;
    assert_eq!(h.history_fetches(), 1);

    // A message is stored that never reaches us live, then the server goes away.
    h.api.add_message(message("a3", 3));
    drop(server);
    wait_for_notice(&mut h.handle, "connection lost").await;

    let mut server = h.accept().await;
    assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("a")));

    let snapshot = wait_for(&mut h.handle, "missed message merged", |s| {
        s.connection == ConnectionState::Connected && s.messages.len() == 3
    })
    .await;
    let ids: Vec<_> = snapshot
        .messages
        .iter()
        .map(|m| m.id.clone().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["a1", "a2", "a3"]);
    assert_eq!(h.history_fetches(), 2);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_is_retried_with_backoff() {
    let mut h = harness(5);
    let server = h.online_in_room_a().await;

    h.connector.fail_next(2);
    drop(server);

    let mut server = h.accept().await;
    assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("a")));
    wait_for(&mut h.handle, "reconnected", |s| s.connection == ConnectionState::Connected).await;

    h.handle.shutdown().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let mut h = harness(2);
    let server = h.online_in_room_a().await;

    h.connector.fail_next(10);
    drop(server);

    wait_for_notice(&mut h.handle, "could not reconnect").await;
    let snapshot = wait_for(&mut h.handle, "errored", |s| s.connection == ConnectionState::Errored).await;
    assert_eq!(snapshot.active_room, Some(RoomId::new("a")));
    assert!(h.accepted.try_recv().is_err());

    h.handle.shutdown().await;
}

#[tokio::test]
async fn server_rejection_is_not_retried() {
    let mut h = harness(5);
    let server = h.online_in_room_a().await;

    server
        .push(&ServerEvent::ConnectError("jwt expired".into()))
        .await;

    let notice = wait_for_notice(&mut h.handle, "connection lost").await;
    assert!(notice.text().contains("jwt expired"));
    wait_for(&mut h.handle, "errored", |s| s.connection == ConnectionState::Errored).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.accepted.try_recv().is_err());

    h.handle.shutdown().await;
}

#[tokio::test]
async fn invalid_credential_fails_connect_without_retry() {
    let (connector, accepted) = LoopbackConnector::new();
    let connector = connector.with_expected_token("right");
    let mut h = Harness::start(5, connector, accepted, "wrong");

    h.handle.send(ChatCommand::Connect).await;
    let notice = wait_for_notice(&mut h.handle, "connection failed").await;
    assert!(matches!(notice, Notice::Warning(_)));
    let snapshot =
        wait_for(&mut h.handle, "errored", |s| s.connection == ConnectionState::Errored).await;
    assert_eq!(
        snapshot.connection_error.as_deref(),
        Some("connection rejected: invalid credential")
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.accepted.try_recv().is_err());
    assert!(h.api.calls().is_empty());

    h.handle.shutdown().await;
}

#[tokio::test]
async fn manual_disconnect_stays_offline_until_connect() {
    let mut h = harness(5);
    let mut server = h.online_in_room_a().await;

    h.handle.send(ChatCommand::Disconnect).await;
    assert_eq!(tokio::time::timeout(WAIT, server.recv()).await.unwrap(), None);
    wait_for(&mut h.handle, "disconnected", |s| s.connection == ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.accepted.try_recv().is_err());

    h.handle.send(ChatCommand::Connect).await;
    let mut server = h.accept().await;
    assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("a")));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_transport() {
    let mut h = harness(5);
    let mut server = h.online_in_room_a().await;

    h.handle.shutdown().await;
    assert_eq!(tokio::time::timeout(WAIT, server.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn dropping_the_command_sender_shuts_down() {
    let mut h = harness(5);
    let mut server = h.online_in_room_a().await;

    let ClientHandle { commands, task, .. } = h.handle;
    drop(commands);
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(tokio::time::timeout(WAIT, server.recv()).await.unwrap(), None);
}
