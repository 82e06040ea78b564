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

//! Integration tests for room list management.
//!
//! These tests validate:
//! - The room list is loaded on connect with resolved display names
//! - Creating a direct room lists it without activating it
//! - Renaming updates the list
//! - Deleting the active room clears the selection and its messages
//! - Deleting another room leaves the active room untouched
//! - A failed request leaves the list as it was and reports a notice
//! - A message for a room missing from the list triggers a refresh

use std::time::Duration;

use aether::api::memory::{ApiCall, InMemoryApi};
use aether::chat::rooms::RoomKind;
use aether::chat::{ChatConfig, ChatSnapshot, Notice};
use aether::net::{ChatCommand, ClientHandle, NetConfig, spawn_client};
use aether::session::{ConnectionState, Credential};
use aether::transport::loopback::{LoopbackConnector, LoopbackServer};
use aether_proto::event::{ClientEvent, ServerEvent};
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

fn group(id: &str, name: &str) -> RoomSummary {
    RoomSummary {
        id: RoomId::new(id),
        chat_name: Some(name.to_string()),
        is_group: true,
        users: vec![UserRef::new("me", "alice"), UserRef::new("u2", "bob")],
        latest_message: None,
    }
}

fn seeded_api() -> InMemoryApi {
    let api = InMemoryApi::new(UserRef::new("me", "alice"));
    api.add_user(UserRef::new("u2", "bob"));
    api.add_user(UserRef::new("u3", "carol"));
    api.add_room(group("a", "General"));
    api.add_room(group("b", "Random"));
    api.add_message(message("a1", "a", 1));
    api.add_message(message("b1", "b", 2));
    api
}

async fn connected(api: &InMemoryApi) -> (ClientHandle, LoopbackServer) {
    let (connector, mut accepted) = LoopbackConnector::new();
    let mut handle = spawn_client(
        NetConfig::new(ChatConfig::default(), aether::config::ReconnectConfig::default()),
        UserId::new("me"),
        connector,
        Credential::new("token"),
        api.clone(),
    );
    handle.send(ChatCommand::Connect).await;
    let server = tokio::time::timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for handshake")
        .expect("connector dropped");
    wait_for(&mut handle, "room list", |s| {
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

fn names(snapshot: &ChatSnapshot) -> Vec<String> {
    snapshot.rooms.iter().map(|r| r.name.clone()).collect()
}

async fn open_room_a(handle: &mut ClientHandle, server: &mut LoopbackServer) {
    handle.send(ChatCommand::SelectRoom(Some(RoomId::new("a")))).await;
    assert_eq!(next_event(server).await, ClientEvent::JoinChat(RoomId::new("a")));
    wait_for(handle, "room a history", |s| s.messages.len() == 1).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn room_list_loads_on_connect_with_previews() {
    let api = seeded_api();
    let (mut handle, _server) = connected(&api).await;
    let snapshot = handle.snapshots.borrow().clone();
    assert_eq!(names(&snapshot), ["General", "Random"]);
    assert_eq!(snapshot.rooms[0].preview(), Some("text a1"));
    assert!(snapshot.active_room.is_none());

    handle.send(ChatCommand::RefreshRooms).await;
    tokio::time::timeout(WAIT, async {
        while api.calls().iter().filter(|c| matches!(c, ApiCall::FetchRooms)).count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn created_direct_room_is_listed_but_not_opened() {
    let api = seeded_api();
    let (mut handle, mut server) = connected(&api).await;
    open_room_a(&mut handle, &mut server).await;

    handle.send(ChatCommand::CreateRoom(UserId::new("u3"))).await;
    let snapshot = wait_for(&mut handle, "new room", |s| s.rooms.len() == 3).await;

    let created = &snapshot.rooms[0];
    assert_eq!(created.name, "carol");
    assert_eq!(created.kind, RoomKind::Direct);
    assert_eq!(snapshot.active_room, Some(RoomId::new("a")));
    assert!(next_notice(&mut handle).await.text().contains("carol"));

    // Opening it again is idempotent on the server.
    handle.send(ChatCommand::CreateRoom(UserId::new("u3"))).await;
    next_notice(&mut handle).await;
    assert_eq!(handle.snapshots.borrow().rooms.len(), 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn rename_updates_the_list() {
    let api = seeded_api();
    let (mut handle, _server) = connected(&api).await;

    handle
        .send(ChatCommand::RenameRoom {
            room: RoomId::new("b"),
            name: "  Off topic ".into(),
        })
        .await;
    let snapshot = wait_for(&mut handle, "renamed", |s| {
        s.rooms.iter().any(|r| r.name == "Off topic")
    })
    .await;
    assert_eq!(names(&snapshot), ["General", "Off topic"]);
    assert!(api.calls().contains(&ApiCall::RenameRoom {
        room: RoomId::new("b"),
        name: "Off topic".into()
    }));

    handle
        .send(ChatCommand::RenameRoom {
            room: RoomId::new("b"),
            name: "   ".into(),
        })
        .await;
    assert!(matches!(next_notice(&mut handle).await, Notice::Warning(_)));

    handle.shutdown().await;
}

#[tokio::test]
async fn deleting_active_room_clears_selection_and_messages() {
    let api = seeded_api();
    let (mut handle, mut server) = connected(&api).await;
    open_room_a(&mut handle, &mut server).await;

    handle.send(ChatCommand::DeleteRoom(RoomId::new("a"))).await;
    let snapshot = wait_for(&mut handle, "room a deleted", |s| s.rooms.len() == 1).await;
    assert!(snapshot.active_room.is_none());
    assert!(snapshot.messages.is_empty());
    assert_eq!(names(&snapshot), ["Random"]);
    assert_eq!(next_event(&mut server).await, ClientEvent::LeaveChat(RoomId::new("a")));

    // Late traffic for the deleted room does not resurrect its messages.
    server
        .push(&ServerEvent::ReceiveMessage(message("a2", "a", 9)))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.snapshots.borrow().messages.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn deleting_other_room_leaves_active_untouched() {
    let api = seeded_api();
    let (mut handle, mut server) = connected(&api).await;
    open_room_a(&mut handle, &mut server).await;

    handle.send(ChatCommand::DeleteRoom(RoomId::new("b"))).await;
    let snapshot = wait_for(&mut handle, "room b deleted", |s| s.rooms.len() == 1).await;
    assert_eq!(snapshot.active_room, Some(RoomId::new("a")));
    assert_eq!(snapshot.messages.len(), 1);
    assert!(server.try_recv().is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_delete_keeps_room_and_warns() {
    let api = seeded_api();
    let (mut handle, _server) = connected(&api).await;

    api.fail_next("database offline");
    handle.send(ChatCommand::DeleteRoom(RoomId::new("b"))).await;
    let notice = next_notice(&mut handle).await;
    assert!(matches!(&notice, Notice::Warning(text) if text.contains("database offline")));
    assert_eq!(handle.snapshots.borrow().rooms.len(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_room_command_is_rejected_locally() {
    let api = seeded_api();
    let (mut handle, _server) = connected(&api).await;

    handle.send(ChatCommand::DeleteRoom(RoomId::new("zz"))).await;
    let notice = next_notice(&mut handle).await;
    assert!(notice.text().contains("unknown room"));
    assert!(!api.calls().iter().any(|c| matches!(c, ApiCall::DeleteRoom(_))));

    handle.shutdown().await;
}

#[tokio::test]
async fn message_for_unlisted_room_refreshes_list() {
    let api = seeded_api();
    let (mut handle, server) = connected(&api).await;

    api.add_room(group("c", "Brand new"));
    server
        .push(&ServerEvent::ReceiveMessage(message("c1", "c", 5)))
        .await;

    let snapshot = wait_for(&mut handle, "room c listed", |s| s.rooms.len() == 3).await;
    assert!(names(&snapshot).contains(&"Brand new".to_string()));

    handle.shutdown().await;
}
