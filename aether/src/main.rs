//! `Aether`: terminal chat client.
//!
//! Connects to the chat server and runs a line-oriented REPL. Configuration
//! via CLI flags, environment variables, or config file
//! (`~/.config/aether/config.toml`).
//!
//! ```bash
//! cargo run --bin aether -- --server-url ws://127.0.0.1:4000/ws \
//!     --user-id 64f0c0ffee --token "$TOKEN" --room general
//!
//! # Or via environment variables
//! AETHER_SERVER_URL=ws://127.0.0.1:4000/ws AETHER_USER_ID=64f0c0ffee \
//!     AETHER_TOKEN=... cargo run
//! ```

use std::io::BufRead;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use aether::api::http::{DEFAULT_REQUEST_TIMEOUT, HttpChatApi};
use aether::chat::rooms::find_room;
use aether::config::{CliArgs, ClientConfig};
use aether::net::{ChatCommand, ClientHandle, NetConfig, spawn_client};
use aether::repl::{Action, HELP, Renderer, format_notice, format_rooms, parse_line, resolve};
use aether::session::Credential;
use aether::transport::ws::WsConnector;

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = CliArgs::parse();

    // Logs go to a file so stdout stays free for the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let endpoints = match config.endpoints() {
        Ok(endpoints) => endpoints,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let Some(token) = cli.token.take().filter(|t| !t.is_empty()) else {
        eprintln!("error: no access token (use --token or AETHER_TOKEN)");
        return ExitCode::FAILURE;
    };
    let credential = Credential::new(token);

    let api = match HttpChatApi::new(&endpoints.api_url, &credential, DEFAULT_REQUEST_TIMEOUT) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let connector =
        WsConnector::new(endpoints.server_url.clone()).with_connect_timeout(config.connect_timeout);

    tracing::info!(
        server_url = %endpoints.server_url,
        api_url = %endpoints.api_url,
        user_id = %endpoints.user_id,
        "aether starting"
    );

    let handle = spawn_client(
        NetConfig::from(&config),
        endpoints.user_id,
        connector,
        credential,
        api,
    );
    run_repl(handle, config.initial_room).await;

    tracing::info!("aether exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("aether.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Read stdin on a dedicated thread; the channel closes at end of input.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_repl(mut handle: ClientHandle, initial_room: Option<String>) {
    let mut input = spawn_stdin_reader();
    let mut renderer = Renderer::new();
    let mut pending_room = initial_room;

    println!("type /help for commands");
    handle.send(ChatCommand::Connect).await;

    loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else { break };
                let snapshot = handle.snapshots.borrow().clone();
                let action = parse_line(&line)
                    .and_then(|parsed| parsed.map(|i| resolve(i, &snapshot)).transpose());
                match action {
                    Ok(None) => {}
                    Ok(Some(Action::Quit)) => break,
                    Ok(Some(Action::Help)) => println!("{HELP}"),
                    Ok(Some(Action::ListRooms)) => {
                        for line in format_rooms(&snapshot) {
                            println!("{line}");
                        }
                    }
                    Ok(Some(Action::Command(command))) => {
                        if !handle.send(command).await {
                            break;
                        }
                    }
                    Err(e) => println!("! {e}"),
                }
            }
            changed = handle.snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = handle.snapshots.borrow_and_update().clone();
                if let Some(key) = pending_room.as_deref()
                    && let Some(room) = find_room(&snapshot.rooms, key)
                {
                    let id = room.id.clone();
                    pending_room = None;
                    handle.send(ChatCommand::SelectRoom(Some(id))).await;
                }
                for line in renderer.render(&snapshot) {
                    println!("{line}");
                }
            }
            Some(notice) = handle.notices.recv() => println!("{}", format_notice(&notice)),
        }
    }

    handle.shutdown().await;
}
