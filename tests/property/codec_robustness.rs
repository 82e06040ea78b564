// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

//! Property tests for the streaming frame decoder.
//!
//! The client reader task feeds every text frame it receives into
//! `decode_server`, so arbitrary input must produce an error rather than a
//! panic, and well-formed frames must survive extra unknown fields.

use aether_proto::codec::{self, CodecError};
use aether_proto::event::ServerEvent;
use aether_proto::message::RoomId;
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_server_never_panics(text in ".{0,256}") {
        let _ = codec::decode_server(&text);
    }

    #[test]
    fn decode_client_never_panics(text in ".{0,256}") {
        let _ = codec::decode_client(&text);
    }

    #[test]
    fn unknown_event_names_are_reported(name in "[a-z_]{1,24}") {
        prop_assume!(!["receive_message", "typing", "connect_error"].contains(&name.as_str()));
        let frame = format!(r#"{{"event":"{name}","data":null}}"#);
        let is_unknown = matches!(codec::decode_server(&frame), Err(CodecError::UnknownEvent(n)) if n == name);
        prop_assert!(is_unknown);
    }

    #[test]
    fn typing_room_ids_pass_through(room in "[A-Za-z0-9]{1,24}", extra in "[a-z]{1,8}") {
        let frame = format!(r#"{{"event":"typing","data":{{"roomId":"{room}","{extra}x":1}}}}"#);
        let decoded = codec::decode_server(&frame).unwrap();
        prop_assert_eq!(decoded, ServerEvent::Typing { room_id: Some(RoomId::new(room)) });
    }
}
