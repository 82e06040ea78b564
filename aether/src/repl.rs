//! Line-oriented front end: slash-command parsing and snapshot rendering.
//!
//! The binary reads stdin line by line, turns each line into an [`Action`]
//! and prints whatever the [`Renderer`] derives from successive
//! [`ChatSnapshot`]s.

use std::collections::HashMap;

use chrono::Local;

use aether_proto::message::{RoomId, UserId};

use crate::chat::rooms::{Room, find_room};
use crate::chat::store::{Delivery, StoredMessage};
use crate::chat::{ChatSnapshot, Notice};
use crate::net::ChatCommand;
use crate::session::ConnectionState;

/// Shown for `/help`.
pub const HELP: &str = "\
commands:
  /rooms                 list rooms
  /join <room>           open a room (id or name)
  /leave                 close the current room
  /older                 load older messages
  /create <user>         open a direct room with a user (id or search result name)
  /rename <room> <name>  rename a room
  /delete <room>         delete a room
  /search <text>         search users
  /more                  more search results
  /retry                 resend the last failed message
  /connect               reconnect to the server
  /quit                  exit
anything else is sent to the current room";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text for the active room.
    Say(String),
    Rooms,
    Join(String),
    Leave,
    Older,
    Create(String),
    Rename { room: String, name: String },
    Delete(String),
    Search(String),
    More,
    Retry,
    Connect,
    Help,
    Quit,
}

/// Errors from parsing or resolving an input line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("unknown command /{0} (try /help)")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("no room matches '{0}'")]
    UnknownRoom(String),
}

/// What the front end does with a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Forward to the driver.
    Command(ChatCommand),
    /// Print the room list.
    ListRooms,
    /// Print [`HELP`].
    Help,
    Quit,
}

/// Parse one line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Unknown commands and missing arguments.
pub fn parse_line(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Say(line.to_string())));
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    let required = |usage: &'static str| {
        if rest.is_empty() {
            Err(InputError::Usage(usage))
        } else {
            Ok(rest.to_string())
        }
    };

    let input = match name {
        "rooms" => Input::Rooms,
        "join" => Input::Join(required("/join <room>")?),
        "leave" => Input::Leave,
        "older" => Input::Older,
        "create" => Input::Create(required("/create <user>")?),
        "rename" => {
            let (room, name) = rest
                .split_once(char::is_whitespace)
                .ok_or(InputError::Usage("/rename <room> <name>"))?;
            Input::Rename {
                room: room.to_string(),
                name: name.trim().to_string(),
            }
        }
        "delete" => Input::Delete(required("/delete <room>")?),
        "search" => Input::Search(rest.to_string()),
        "more" => Input::More,
        "retry" => Input::Retry,
        "connect" => Input::Connect,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };
    Ok(Some(input))
}

/// Resolve room and user names against the latest snapshot.
///
/// # Errors
///
/// [`InputError::UnknownRoom`] when a room argument matches nothing.
pub fn resolve(input: Input, snapshot: &ChatSnapshot) -> Result<Action, InputError> {
    let room = |key: &str| -> Result<RoomId, InputError> {
        find_room(&snapshot.rooms, key)
            .map(|r| r.id.clone())
            .ok_or_else(|| InputError::UnknownRoom(key.to_string()))
    };

    let command = match input {
        Input::Say(text) => ChatCommand::Send(text),
        Input::Rooms => return Ok(Action::ListRooms),
        Input::Help => return Ok(Action::Help),
        Input::Quit => return Ok(Action::Quit),
        Input::Join(key) => ChatCommand::SelectRoom(Some(room(&key)?)),
        Input::Leave => ChatCommand::SelectRoom(None),
        Input::Older => ChatCommand::LoadOlder,
        Input::Create(key) => {
            let user = snapshot
                .search_results
                .iter()
                .find(|u| u.username.eq_ignore_ascii_case(&key))
                .map_or_else(|| UserId::new(key.as_str()), |u| u.id.clone());
            ChatCommand::CreateRoom(user)
        }
        Input::Rename { room: key, name } => ChatCommand::RenameRoom {
            room: room(&key)?,
            name,
        },
        Input::Delete(key) => ChatCommand::DeleteRoom(room(&key)?),
        Input::Search(query) => ChatCommand::Search(query),
        Input::More => ChatCommand::SearchMore,
        Input::Retry => ChatCommand::Retry(None),
        Input::Connect => ChatCommand::Connect,
    };
    Ok(Action::Command(command))
}

/// Format one message as `[HH:MM] sender: content`, in local time.
#[must_use]
pub fn format_message(message: &StoredMessage) -> String {
    let time = message.created_at.with_timezone(&Local).format("%H:%M");
    let sender = if message.is_mine {
        "you"
    } else {
        message.sender_name()
    };
    let status = match message.delivery {
        Delivery::Pending => " (sending)",
        Delivery::Failed => " (not delivered)",
        Delivery::Confirmed => "",
    };
    format!("[{time}] {sender}: {}{status}", message.content)
}

/// Format the room list, marking the active room.
#[must_use]
pub fn format_rooms(snapshot: &ChatSnapshot) -> Vec<String> {
    if snapshot.rooms.is_empty() {
        return vec!["no rooms".to_string()];
    }
    snapshot
        .rooms
        .iter()
        .map(|room| {
            let marker = if snapshot.active_room.as_ref() == Some(&room.id) {
                '*'
            } else {
                ' '
            };
            match room.preview() {
                Some(preview) => format!("{marker} {} [{}]: {preview}", room.name, room.id),
                None => format!("{marker} {} [{}]", room.name, room.id),
            }
        })
        .collect()
}

/// Format a notice for printing.
#[must_use]
pub fn format_notice(notice: &Notice) -> String {
    match notice {
        Notice::Info(text) => format!("* {text}"),
        Notice::Warning(text) => format!("! {text}"),
    }
}

fn message_key(message: &StoredMessage) -> String {
    match (&message.client_id, &message.id) {
        (Some(cid), _) => format!("c:{cid}"),
        (None, Some(id)) => format!("m:{id}"),
        (None, None) => format!("t:{}:{}", message.created_at.timestamp_millis(), message.content),
    }
}

fn room_name(rooms: &[Room], id: &RoomId) -> String {
    rooms
        .iter()
        .find(|r| &r.id == id)
        .map_or_else(|| id.to_string(), |r| r.name.clone())
}

/// Turns successive snapshots into the lines to print.
#[derive(Debug, Default)]
pub struct Renderer {
    connection: ConnectionState,
    room: Option<RoomId>,
    printed: HashMap<String, Delivery>,
    peer_typing: bool,
    search_query: String,
    search_shown: usize,
}

impl Renderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines describing what changed since the previous snapshot.
    pub fn render(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if snapshot.connection != self.connection {
            self.connection = snapshot.connection;
            match (&snapshot.connection_error, snapshot.connection) {
                (Some(reason), ConnectionState::Errored) => {
                    lines.push(format!("* {}: {reason}", snapshot.connection));
                }
                _ => lines.push(format!("* {}", snapshot.connection)),
            }
        }

        if snapshot.active_room != self.room {
            self.room.clone_from(&snapshot.active_room);
            self.printed.clear();
            self.peer_typing = false;
            match &snapshot.active_room {
                Some(id) => lines.push(format!("== {} ==", room_name(&snapshot.rooms, id))),
                None => lines.push("* no room selected".to_string()),
            }
        }

        for message in &snapshot.messages {
            let key = message_key(message);
            match self.printed.insert(key, message.delivery) {
                None => lines.push(format_message(message)),
                Some(previous) if previous != message.delivery => {
                    if message.delivery == Delivery::Failed {
                        lines.push(format_message(message));
                    }
                }
                Some(_) => {}
            }
        }

        if snapshot.peer_typing != self.peer_typing {
            self.peer_typing = snapshot.peer_typing;
            if snapshot.peer_typing {
                lines.push("... someone is typing".to_string());
            }
        }

        if snapshot.search_query != self.search_query {
            self.search_query.clone_from(&snapshot.search_query);
            self.search_shown = 0;
        }
        if snapshot.search_results.len() < self.search_shown {
            self.search_shown = 0;
        }
        if snapshot.search_results.len() > self.search_shown {
            for user in &snapshot.search_results[self.search_shown..] {
                lines.push(format!("  @{} [{}]", user.username, user.id));
            }
            self.search_shown = snapshot.search_results.len();
            if snapshot.search_has_more {
                lines.push("  (/more for more results)".to_string());
            }
        }

        lines
    }
}
