//! `Aether`: real-time chat synchronization client library.
//!
//! The [`chat::ChatCore`] keeps the local view of rooms and messages
//! consistent with the server; [`net::spawn_client`] drives it over a
//! [`transport::Connector`] and a [`api::ChatApi`].

pub mod api;
pub mod chat;
pub mod config;
pub mod net;
pub mod repl;
pub mod session;
pub mod transport;
