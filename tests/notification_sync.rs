//! Notification sync through the public engine API.

use investlink::backend::memory::{FeedOp, MemoryBackend};
use investlink::{
    ChannelState, ContactRequests, CoreConfig, CoreError, NotificationSyncEngine, Row, SyncEvent,
    UserId,
};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn setup() -> (MemoryBackend, NotificationSyncEngine, ContactRequests) {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.store.seed(
        "users",
        vec![
            row(json!({"id": "alice", "role": "owner", "full_name": "Alice",
                        "profile_picture": "alice.png"})),
            row(json!({"id": "bob", "role": "investor", "full_name": "Bob"})),
            row(json!({"id": "carol", "role": "investor", "full_name": "Carol"})),
        ],
    );

    let config = CoreConfig::from_json_str(r#"{"sync": {"coalesce_window_ms": 80}}"#).unwrap();
    let engine = NotificationSyncEngine::new(
        backend.store.clone(),
        backend.blobs.clone(),
        backend.feed.clone(),
        &config,
    );
    let contacts = ContactRequests::new(backend.store.clone(), "contact_requests");
    (backend, engine, contacts)
}

/// Wait for the next published list with `len` records.
fn wait_for_len(observer: &investlink::Observer<SyncEvent>, len: usize) -> Vec<investlink::NotificationRecord> {
    loop {
        match observer.recv_timeout(WAIT).expect("timed out waiting for list") {
            SyncEvent::Updated(list) if list.len() == len => return list,
            _ => continue,
        }
    }
}

#[test]
fn test_feed_event_refetches_full_ordered_list() {
    let (backend, engine, contacts) = setup();
    backend.store.seed(
        "contact_requests",
        vec![
            row(json!({"id": 1, "sender_id": "bob", "receiver_id": "alice",
                        "message": "first", "created_at": "2024-05-01T10:00:00Z"})),
            row(json!({"id": 2, "sender_id": "carol", "receiver_id": "alice",
                        "message": "second", "created_at": "2024-05-02T10:00:00Z"})),
        ],
    );
    let alice = UserId::from("alice");
    engine.start(&alice).unwrap();
    assert_eq!(engine.records().len(), 2);
    let observer = engine.subscribe();

    contacts
        .send(&UserId::from("bob"), &alice, "third", Some("0790000000"))
        .unwrap();

    let list = wait_for_len(&observer, 3);
    assert_eq!(list[0].message, "third");
    assert_eq!(list[0].sender_display_name, "Bob");
    assert_eq!(list[0].phone_number.as_deref(), Some("0790000000"));
    assert_eq!(list[1].message, "second");
    assert_eq!(list[2].message, "first");
    assert!(list.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    engine.stop();
    assert!(engine.records().is_empty());
    assert_eq!(engine.channel_state(), ChannelState::Closed);
    assert_eq!(backend.feed.active_count(), 0);
}

#[test]
fn test_events_for_other_receivers_are_ignored() {
    let (backend, engine, contacts) = setup();
    engine.start(&UserId::from("alice")).unwrap();

    contacts
        .send(&UserId::from("bob"), &UserId::from("carol"), "not for alice", None)
        .unwrap();

    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(backend.store.fetch_count("contact_requests"), 1);
    assert!(engine.records().is_empty());
}

#[test]
fn test_start_same_user_twice_opens_one_channel() {
    let (backend, engine, _contacts) = setup();
    let alice = UserId::from("alice");

    engine.start(&alice).unwrap();
    engine.start(&alice).unwrap();

    assert_eq!(backend.feed.active_count(), 1);
    assert_eq!(backend.feed.journal().len(), 1);
    assert_eq!(backend.store.fetch_count("contact_requests"), 1);
}

#[test]
fn test_user_switch_closes_before_opening() {
    let (backend, engine, _contacts) = setup();

    engine.start(&UserId::from("alice")).unwrap();
    engine.start(&UserId::from("bob")).unwrap();
    engine.start(&UserId::from("alice")).unwrap();

    let journal = backend.feed.journal();
    let kinds: Vec<&str> = journal
        .iter()
        .map(|op| match op {
            FeedOp::Subscribed { .. } => "open",
            FeedOp::Unsubscribed { .. } => "close",
        })
        .collect();
    assert_eq!(kinds, vec!["open", "close", "open", "close", "open"]);
    assert_eq!(backend.feed.active_count(), 1);
    assert!(backend.feed.active_topics()[0].starts_with("contact_requests:alice:"));
}

#[test]
fn test_burst_within_window_refetches_once() {
    let (backend, engine, contacts) = setup();
    let alice = UserId::from("alice");
    engine.start(&alice).unwrap();
    let observer = engine.subscribe();

    for i in 0..10 {
        contacts
            .send(&UserId::from("bob"), &alice, &format!("ping {i}"), None)
            .unwrap();
    }

    wait_for_len(&observer, 10);
    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(backend.store.fetch_count("contact_requests"), 2);
}

#[test]
fn test_failed_refetch_keeps_previous_list() {
    let (backend, engine, contacts) = setup();
    let alice = UserId::from("alice");
    contacts.send(&UserId::from("bob"), &alice, "kept", None).unwrap();
    engine.start(&alice).unwrap();
    let before = engine.records();
    assert_eq!(before.len(), 1);

    let observer = engine.subscribe();
    observer.recv_timeout(WAIT).unwrap();

    backend.store.fail_fetches("contact_requests", 1);
    contacts.send(&UserId::from("carol"), &alice, "lost", None).unwrap();

    let errors: Vec<CoreError> = std::iter::from_fn(|| observer.recv_timeout(Duration::from_millis(400)).ok())
        .filter_map(|event| match event {
            SyncEvent::Error(e) => Some(e),
            SyncEvent::Updated(list) => panic!("unexpected list of {}", list.len()),
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], CoreError::FetchFailed(_)));
    assert_eq!(engine.records(), before);
}
