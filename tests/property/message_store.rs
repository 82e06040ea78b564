// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

//! Property tests for the message store ordering and de-duplication.

use std::collections::HashSet;

use aether::chat::store::{AppendOutcome, MessageStore};
use aether_proto::message::{Message, MessageId, RoomId, UserId, UserRef};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn message(id: u8, room: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(format!("m{id}")),
        room_id: RoomId::new(room),
        sender: Some(UserRef::new("peer", "peer")),
        content: format!("body {id}"),
        created_at: at(secs),
        client_id: None,
    }
}

fn store_for(room: &str) -> MessageStore {
    let mut store = MessageStore::new(UserId::new("me"));
    store.reset(Some(RoomId::new(room)));
    store
}

fn visible_ids(store: &MessageStore) -> Vec<String> {
    store
        .messages()
        .iter()
        .map(|m| m.id.as_ref().unwrap().to_string())
        .collect()
}

proptest! {
    #[test]
    fn live_duplicates_appear_once_in_first_seen_order(ids in prop::collection::vec(0u8..16, 0..64)) {
        let mut store = store_for("r");
        let mut expected = Vec::new();
        let mut seen = HashSet::new();
        for (i, id) in ids.iter().enumerate() {
            let outcome = store.append_live(message(*id, "r", i64::try_from(i).unwrap()));
            if seen.insert(*id) {
                expected.push(format!("m{id}"));
                prop_assert_eq!(outcome, AppendOutcome::Appended);
            } else {
                prop_assert_eq!(outcome, AppendOutcome::Duplicate);
            }
        }
        prop_assert_eq!(visible_ids(&store), expected);
    }

    #[test]
    fn newest_first_history_is_shown_oldest_first(times in prop::collection::hash_set(0i64..10_000, 1..40)) {
        let mut times: Vec<i64> = times.into_iter().collect();
        times.sort_unstable_by(|a, b| b.cmp(a));
        let page: Vec<Message> = times
            .iter()
            .enumerate()
            .map(|(i, t)| message(u8::try_from(i).unwrap(), "r", *t))
            .collect();

        let mut store = store_for("r");
        prop_assert!(store.load_history(&RoomId::new("r"), page));

        let shown: Vec<DateTime<Utc>> = store.messages().iter().map(|m| m.created_at).collect();
        let mut sorted = shown.clone();
        sorted.sort();
        prop_assert_eq!(shown, sorted);
        prop_assert_eq!(store.len(), times.len());
    }

    #[test]
    fn history_and_live_overlap_never_duplicates(
        history in prop::collection::vec(0u8..24, 0..24),
        live in prop::collection::vec(0u8..24, 0..24),
        live_first in any::<bool>(),
    ) {
        let mut store = store_for("r");
        let page: Vec<Message> = history.iter().map(|id| message(*id, "r", i64::from(*id))).collect();
        if live_first {
            for id in &live {
                store.append_live(message(*id, "r", i64::from(*id)));
            }
            store.load_history(&RoomId::new("r"), page);
        } else {
            store.load_history(&RoomId::new("r"), page);
            for id in &live {
                store.append_live(message(*id, "r", i64::from(*id)));
            }
        }

        let ids = visible_ids(&store);
        let unique: HashSet<&String> = ids.iter().collect();
        prop_assert_eq!(unique.len(), ids.len());

        let expected: HashSet<String> = history.iter().chain(&live).map(|id| format!("m{id}")).collect();
        prop_assert_eq!(ids.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[test]
    fn other_room_traffic_never_leaks(ids in prop::collection::vec(0u8..16, 0..32)) {
        let mut store = store_for("b");
        for id in ids {
            prop_assert_eq!(store.append_live(message(id, "a", 0)), AppendOutcome::OtherRoom);
        }
        prop_assert!(store.is_empty());
        prop_assert!(!store.load_history(&RoomId::new("a"), vec![message(1, "a", 0)]));
    }
}
