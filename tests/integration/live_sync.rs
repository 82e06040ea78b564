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

//! Integration tests for live message synchronization.
//!
//! Drives the real driver (`spawn_client`) over the loopback transport with
//! an in-memory API backend. The test plays the server through
//! `LoopbackServer`: it reads the client's events and pushes server events.
//!
//! These tests validate:
//! - Selecting a room joins it and shows its history oldest first
//! - Live deliveries are appended once, even when repeated
//! - A send shows up immediately and is confirmed by the server echo
//! - An unacknowledged send is marked failed and can be retried
//! - Switching rooms isolates the visible messages
//! - Typing indicators appear and expire
//! - A slow history response for a room that is no longer active is dropped

use std::time::Duration;

use aether::api::memory::InMemoryApi;
use aether::chat::store::Delivery;
use aether::chat::{ChatConfig, ChatSnapshot, Notice};
use aether::config::ReconnectConfig;
use aether::net::{ChatCommand, ClientHandle, NetConfig, spawn_client};
use aether::session::{ConnectionState, Credential};
use aether::transport::loopback::{LoopbackConnector, LoopbackServer};
use aether_proto::event::{ClientEvent, OutgoingMessage, ServerEvent};
use aether_proto::message::{Message, MessageId, RoomId, UserId, UserRef};
use aether_proto::room::RoomSummary;
use chrono::{TimeZone, Utc};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

fn message(id: &str, room: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        room_id: RoomId::new(room),
        sender: Some(UserRef::new("u2", "bob")),
        content: format!("text {id}"),
        created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        client_id: None,
    }
}

fn group(id: &str) -> RoomSummary {
    RoomSummary {
        id: RoomId::new(id),
        chat_name: Some(format!("Room {id}")),
        is_group: true,
        users: vec![UserRef::new("me", "alice"), UserRef::new("u2", "bob")],
        latest_message: None,
    }
}

fn seeded_api() -> InMemoryApi {
    let api = InMemoryApi::new(UserRef::new("me", "alice"));
    api.add_user(UserRef::new("u2", "bob"));
    api.add_room(group("a"));
    api.add_room(group("b"));
    for (i, id) in ["a1", "a2", "a3"].iter().enumerate() {
        api.add_message(message(id, "a", i64::try_from(i).unwrap()));
    }
    api.add_message(message("b1", "b", 10));
    api
}

fn test_config(chat: ChatConfig) -> NetConfig {
    NetConfig {
        chat,
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            max_attempts: 5,
        },
        channel_capacity: 64,
    }
}

/// Start the driver, connect, and return the server end.
async fn connected(
    api: &InMemoryApi,
    chat: ChatConfig,
) -> (ClientHandle, LoopbackServer) {
    let (connector, mut accepted) = LoopbackConnector::new();
    let mut handle = spawn_client(
        test_config(chat),
        UserId::new("me"),
        connector,
        Credential::new("token"),
        api.clone(),
    );
    assert!(handle.send(ChatCommand::Connect).await);
    let server = tokio::time::timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for handshake")
        .expect("connector dropped");
    wait_for(&mut handle, "connected with rooms", |s| {
        s.connection == ConnectionState::Connected && s.rooms.len() == 2
    })
    .await;
    (handle, server)
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

async fn next_notice(handle: &mut ClientHandle) -> Notice {
    tokio::time::timeout(WAIT, handle.notices.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("driver stopped")
}

fn contents(snapshot: &ChatSnapshot) -> Vec<String> {
    snapshot.messages.iter().map(|m| m.content.clone()).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn join_shows_history_then_live_messages_once() {
    let api = seeded_api();
    let (mut handle, mut server) = connected(&api, ChatConfig::default()).await;

    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("a")))).await;
    assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("a")));

    let snapshot = wait_for(&mut handle, "history loaded", |s| s.messages.len() == 3).await;
    assert_eq!(contents(&snapshot), ["text a1", "text a2", "text a3"]);
    assert!(!snapshot.has_older);

    let live = message("a4", "a", 20);
    assert!(server.push(&ServerEvent::ReceiveMessage(live.clone())).await);
    assert!(server.push(&ServerEvent::ReceiveMessage(live)).await);
    assert!(server.push(&ServerEvent::ReceiveMessage(message("a5", "a", 21))).await);

    let snapshot = wait_for(&mut handle, "live messages", |s| s.messages.len() >= 5).await;
    assert_eq!(
        contents(&snapshot),
        ["text a1", "text a2", "text a3", "text a4", "text a5"]
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn send_is_shown_pending_and_confirmed_by_echo() {
    let api = seeded_api();
    let (mut handle, mut server) = connected(&api, ChatConfig::default()).await;
    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("b")))).await;
    next_event(&mut server).await;
    wait_for(&mut handle, "history", |s| s.messages.len() == 1).await;

    handle.send(ChatCommand::Send("  hello  ".into())).await;
    let ClientEvent::SendMessage(OutgoingMessage {
        room_id,
        content,
        client_id,
    }) = next_event(&mut server).await
    else {
        panic!("expected send_message");
    };
    assert_eq!(room_id, RoomId::new("b"));
    assert_eq!(content, "hello");

    let snapshot = wait_for(&mut handle, "pending send", |s| s.messages.len() == 2).await;
    assert_eq!(snapshot.messages[1].delivery, Delivery::Pending);
    assert!(snapshot.messages[1].is_mine);

    let mut echo = message("b2", "b", 30);
    echo.sender = Some(UserRef::new("me", "alice"));
    echo.content = content;
    echo.client_id = Some(client_id);
    server.push(&ServerEvent::ReceiveMessage(echo)).await;

    let snapshot = wait_for(&mut handle, "confirmed send", |s| {
        s.messages.last().is_some_and(|m| m.delivery == Delivery::Confirmed)
    })
    .await;
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].id, Some(MessageId::new("b2")));

    handle.shutdown().await;
}

#[tokio::test]
async fn unacknowledged_send_fails_and_retry_reuses_client_id() {
    let api = seeded_api();
    let chat = ChatConfig {
        ack_timeout: Duration::from_millis(150),
        ..ChatConfig::default()
    };
    let (mut handle, mut server) = connected(&api, chat).await;
    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("b")))).await;
    next_event(&mut server).await;

    handle.send(ChatCommand::Send("lost".into())).await;
    let ClientEvent::SendMessage(first) = next_event(&mut server).await else {
        panic!("expected send_message");
    };

    wait_for(&mut handle, "failed send", |s| {
        s.messages.iter().any(|m| m.delivery == Delivery::Failed)
    })
    .await;
    assert!(matches!(next_notice(&mut handle).await, Notice::Warning(_)));

    handle.send(ChatCommand::Retry(None)).await;
    let ClientEvent::SendMessage(second) = next_event(&mut server).await else {
        panic!("expected resend");
    };
    assert_eq!(second.client_id, first.client_id);
    assert_eq!(second.content, "lost");

    let mut echo = message("b9", "b", 40);
    echo.sender = Some(UserRef::new("me", "alice"));
    echo.client_id = Some(first.client_id);
    server.push(&ServerEvent::ReceiveMessage(echo)).await;
    wait_for(&mut handle, "retried send confirmed", |s| {
        s.messages.iter().all(|m| m.delivery == Delivery::Confirmed) && s.messages.len() == 2
    })
    .await;

    handle.shutdown().await;
}

#[tokio::test]
async fn switching_rooms_isolates_messages() {
    let api = seeded_api();
    let (mut handle, mut server) = connected(&api, ChatConfig::default()).await;

    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("a")))).await;
    wait_for(&mut handle, "room a", |s| s.messages.len() == 3).await;
    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("b")))).await;
    wait_for(&mut handle, "room b", |s| {
        s.active_room == Some(RoomId::new("b")) && s.messages.len() == 1
    })
    .await;

    assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("a")));
    assert_eq!(next_event(&mut server).await, ClientEvent::LeaveChat(RoomId::new("a")));
    assert_eq!(next_event(&mut server).await, ClientEvent::JoinChat(RoomId::new("b")));

    server
        .push(&ServerEvent::ReceiveMessage(message("a9", "a", 50)))
        .await;
    let snapshot = wait_for(&mut handle, "preview of room a", |s| {
        s.rooms
            .iter()
            .any(|r| r.id == RoomId::new("a") && r.preview() == Some("text a9"))
    })
    .await;
    assert_eq!(contents(&snapshot), ["text b1"]);

    handle.shutdown().await;
}

#[tokio::test]
async fn typing_indicator_appears_and_expires() {
    let api = seeded_api();
    let chat = ChatConfig {
        typing_window: Duration::from_millis(200),
        ..ChatConfig::default()
    };
    let (mut handle, mut server) = connected(&api, chat).await;
    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("a")))).await;
    next_event(&mut server).await;

    server.push(&ServerEvent::Typing { room_id: None }).await;
    wait_for(&mut handle, "typing shown", |s| s.peer_typing).await;
    wait_for(&mut handle, "typing expired", |s| !s.peer_typing).await;

    handle.send(ChatCommand::Typing).await;
    assert_eq!(next_event(&mut server).await, ClientEvent::Typing(RoomId::new("a")));

    handle.shutdown().await;
}

#[tokio::test]
async fn slow_history_for_previous_room_is_discarded() {
    let api = seeded_api();
    api.set_room_latency(RoomId::new("a"), Duration::from_millis(300));
    let (mut handle, _server) = connected(&api, ChatConfig::default()).await;

    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("a")))).await;
    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("b")))).await;
    wait_for(&mut handle, "room b history", |s| s.messages.len() == 1).await;

    tokio::time::sleep(Duration::from_millis(450)).await;
    let snapshot = handle.snapshots.borrow().clone();
    assert_eq!(snapshot.active_room, Some(RoomId::new("b")));
    assert_eq!(contents(&snapshot), ["text b1"]);
    assert!(!snapshot.loading_history);

    handle.shutdown().await;
}
