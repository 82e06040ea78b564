//! Shared protocol definitions for the `Aether` chat wire format.

pub mod codec;
pub mod event;
pub mod message;
pub mod room;
