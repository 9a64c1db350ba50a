//! Live notification list.
//!
//! The [`NotificationSyncEngine`] owns at most one [`ChangeFeedChannel`]
//! at a time, bound to the signed-in user. Channel signals are coalesced
//! into full refetches of the user's incoming contact requests; each
//! refetch replaces the published list.
//!
//! ```text
//! start(u) --> close previous channel (awaited) --> initial fetch --> open channel(u)
//!                                                                        |
//!            publish Updated(list) <-- refetch <-- coalesce <-- Changed -+
//! ```
//!
//! [`ChangeFeedChannel`]: crate::feed::ChangeFeedChannel

mod engine;
mod fetch;
mod view;

pub use engine::{NotificationSyncEngine, SyncEvent};
pub use view::NotificationView;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{FeedOp, MemoryBackend};
    use crate::backend::RowStore;
    use crate::config::CoreConfig;
    use crate::error::CoreError;
    use crate::feed::ChannelState;
    use crate::observe::Observer;
    use crate::types::{NotificationRecord, Row, UserId};
    use serde_json::json;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.sync.coalesce_window_ms = 100;
        config
    }

    fn engine(backend: &MemoryBackend) -> NotificationSyncEngine {
        NotificationSyncEngine::new(
            backend.store.clone(),
            backend.blobs.clone(),
            backend.feed.clone(),
            &config(),
        )
    }

    fn seed_users(backend: &MemoryBackend) {
        backend.store.seed(
            "users",
            vec![
                row(json!({"id": "u1", "role": "investor", "full_name": "Ines"})),
                row(json!({"id": "u2", "role": "owner", "full_name": "Omar",
                            "city": "Jeddah", "profile_picture": "u2.jpg"})),
                row(json!({"id": "u3", "role": "owner", "full_name": "Lina"})),
            ],
        );
    }

    fn request(id: u64, sender: &str, receiver: &str, created_at: &str) -> Row {
        row(json!({
            "id": id,
            "sender_id": sender,
            "receiver_id": receiver,
            "message": format!("hello from {sender}"),
            "phone_number": null,
            "created_at": created_at,
        }))
    }

    /// Next Updated event, skipping errors.
    fn next_list(observer: &Observer<SyncEvent>) -> Vec<NotificationRecord> {
        loop {
            match observer.recv_timeout(WAIT).expect("no sync event") {
                SyncEvent::Updated(list) => return list,
                SyncEvent::Error(_) => continue,
            }
        }
    }

    #[test]
    fn test_start_fetches_and_orders() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend.store.seed(
            "contact_requests",
            vec![
                request(1, "u2", "u1", "2024-01-01T09:00:00Z"),
                request(2, "u3", "u1", "2024-01-03T09:00:00Z"),
                request(3, "u2", "u9", "2024-01-04T09:00:00Z"),
            ],
        );
        let engine = engine(&backend);

        engine.start(&UserId::from("u1")).unwrap();

        let records = engine.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "2");
        assert_eq!(records[1].id, "1");
        assert_eq!(records[1].sender_display_name, "Omar");
        assert_eq!(records[1].sender_city.as_deref(), Some("Jeddah"));
        assert!(records[1]
            .sender_avatar_url
            .as_ref()
            .unwrap()
            .as_str()
            .ends_with("/object/public/pfp/u2.jpg"));
        assert!(records[0].sender_avatar_url.is_none());
        assert_eq!(engine.channel_state(), ChannelState::Open);
    }

    #[test]
    fn test_start_twice_same_user_is_idempotent() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);
        let user = UserId::from("u1");

        engine.start(&user).unwrap();
        let first = engine.channel_id();
        engine.start(&user).unwrap();

        assert_eq!(engine.channel_id(), first);
        assert_eq!(backend.feed.active_count(), 1);
        assert_eq!(backend.store.fetch_count("contact_requests"), 1);
    }

    #[test]
    fn test_switch_user_closes_before_open() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);

        engine.start(&UserId::from("u1")).unwrap();
        engine.start(&UserId::from("u2")).unwrap();

        let journal = backend.feed.journal();
        assert_eq!(journal.len(), 3);
        match (&journal[0], &journal[1], &journal[2]) {
            (
                FeedOp::Subscribed { topic: a_open, filter: a_filter },
                FeedOp::Unsubscribed { topic: a_close },
                FeedOp::Subscribed { filter: b_filter, .. },
            ) => {
                assert_eq!(a_open, a_close);
                assert_eq!(a_filter, "receiver_id=eq.u1");
                assert_eq!(b_filter, "receiver_id=eq.u2");
            }
            other => panic!("unexpected journal order: {:?}", other),
        }
        assert_eq!(backend.feed.active_count(), 1);
        assert_eq!(engine.current_user(), Some(UserId::from("u2")));
    }

    #[test]
    fn test_burst_of_changes_coalesces_into_one_refetch() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);
        let observer = engine.subscribe();

        engine.start(&UserId::from("u1")).unwrap();
        assert_eq!(backend.store.fetch_count("contact_requests"), 1);

        for i in 0..5 {
            backend
                .store
                .insert_row(
                    "contact_requests",
                    request(10 + i, "u2", "u1", &format!("2024-02-0{}T00:00:00Z", i + 1)),
                )
                .unwrap();
        }

        // Initial (empty) list, then the refetched one.
        let mut list = next_list(&observer);
        while list.len() < 5 {
            list = next_list(&observer);
        }
        assert_eq!(list[0].id, "14");

        // Initial fetch plus a single refetch for the whole burst.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(backend.store.fetch_count("contact_requests"), 2);
    }

    #[test]
    fn test_failed_refetch_keeps_list_and_signals_once() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend
            .store
            .seed("contact_requests", vec![request(1, "u2", "u1", "2024-01-01T00:00:00Z")]);
        let engine = engine(&backend);

        engine.start(&UserId::from("u1")).unwrap();
        let observer = engine.subscribe();
        assert!(matches!(observer.recv_timeout(WAIT).unwrap(), SyncEvent::Updated(l) if l.len() == 1));

        backend.store.fail_fetches("contact_requests", 1);
        backend
            .store
            .insert_row("contact_requests", request(2, "u3", "u1", "2024-01-02T00:00:00Z"))
            .unwrap();

        match observer.recv_timeout(WAIT).unwrap() {
            SyncEvent::Error(CoreError::FetchFailed(_)) => {}
            other => panic!("expected fetch error, got {:?}", other),
        }
        std::thread::sleep(Duration::from_millis(300));
        assert!(observer.try_recv().is_err());
        assert_eq!(engine.records().len(), 1);
    }

    #[test]
    fn test_failed_initial_fetch_publishes_empty_and_error() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend
            .store
            .seed("contact_requests", vec![request(1, "u2", "u1", "2024-01-01T00:00:00Z")]);
        backend.store.fail_fetches("contact_requests", 1);
        let engine = engine(&backend);
        let observer = engine.subscribe();

        engine.start(&UserId::from("u1")).unwrap();

        assert_eq!(observer.try_recv().unwrap(), SyncEvent::Updated(Vec::new()));
        assert_eq!(observer.try_recv().unwrap(), SyncEvent::Updated(Vec::new()));
        assert!(matches!(
            observer.try_recv().unwrap(),
            SyncEvent::Error(CoreError::FetchFailed(_))
        ));
        // The channel still opens so the next change recovers the list.
        assert_eq!(engine.channel_state(), ChannelState::Open);
    }

    #[test]
    fn test_subscribe_failure_reported_and_retried_on_next_start() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend.feed.fail_next_subscribes(1);
        let engine = engine(&backend);
        let observer = engine.subscribe();
        let user = UserId::from("u1");

        engine.start(&user).unwrap();
        assert_eq!(engine.channel_state(), ChannelState::Closed);

        loop {
            match observer.recv_timeout(WAIT).unwrap() {
                SyncEvent::Error(e) => {
                    assert!(matches!(e, CoreError::ChannelSubscribeError(_)));
                    break;
                }
                SyncEvent::Updated(_) => continue,
            }
        }

        engine.start(&user).unwrap();
        assert_eq!(engine.channel_state(), ChannelState::Open);
        assert_eq!(backend.feed.active_count(), 1);
    }

    #[test]
    fn test_stop_closes_and_clears() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend.store.seed(
            "contact_requests",
            vec![
                request(1, "u2", "u1", "2024-01-01T00:00:00Z"),
                request(2, "u3", "u1", "2024-01-02T00:00:00Z"),
            ],
        );
        let engine = engine(&backend);

        engine.stop();

        engine.start(&UserId::from("u1")).unwrap();
        assert_eq!(engine.records().len(), 2);

        engine.stop();
        assert!(engine.records().is_empty());
        assert_eq!(engine.channel_state(), ChannelState::Closed);
        assert_eq!(backend.feed.active_count(), 0);
        assert!(engine.current_user().is_none());

        engine.stop();
    }

    #[test]
    fn test_late_refetch_after_stop_is_discarded() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);
        engine.start(&UserId::from("u1")).unwrap();

        let hold = backend.store.hold_fetches("contact_requests");
        backend
            .store
            .insert_row("contact_requests", request(1, "u2", "u1", "2024-01-01T00:00:00Z"))
            .unwrap();

        // Wait for the worker to be blocked inside its refetch.
        while backend.store.fetch_count("contact_requests") < 2 {
            std::thread::sleep(Duration::from_millis(5));
        }
        engine.stop();
        hold.release();

        std::thread::sleep(Duration::from_millis(200));
        assert!(engine.records().is_empty());
    }

    #[test]
    fn test_avatar_failure_degrades_to_none() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend
            .store
            .seed("contact_requests", vec![request(1, "u2", "u1", "2024-01-01T00:00:00Z")]);
        backend.blobs.set_fail_public_urls(true);
        let engine = engine(&backend);

        engine.start(&UserId::from("u1")).unwrap();
        let records = engine.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sender_display_name, "Omar");
        assert!(records[0].sender_avatar_url.is_none());
    }

    #[test]
    fn test_view_unmount_stops_sync() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);
        let user = UserId::from("u1");

        let first = engine.mount_view(&user).unwrap();
        let second = engine.mount_view(&user).unwrap();
        assert_eq!(backend.feed.active_count(), 1);

        drop(first);
        assert_eq!(engine.channel_state(), ChannelState::Open);

        drop(second);
        assert_eq!(engine.channel_state(), ChannelState::Closed);
        assert_eq!(backend.feed.active_count(), 0);
    }

    #[test]
    fn test_view_survives_restart_after_subscribe_failure() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend.feed.fail_next_subscribes(1);
        let engine = engine(&backend);
        let user = UserId::from("u1");

        let view = engine.mount_view(&user).unwrap();
        assert_eq!(engine.channel_state(), ChannelState::Closed);

        engine.start(&user).unwrap();
        assert_eq!(engine.channel_state(), ChannelState::Open);
        assert_eq!(backend.feed.active_count(), 1);

        drop(view);
        assert_eq!(backend.feed.active_count(), 0);
        assert_eq!(engine.current_user(), None);
    }

    #[test]
    fn test_views_mounted_across_restart_both_count() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend.feed.fail_next_subscribes(1);
        let engine = engine(&backend);
        let user = UserId::from("u1");

        let first = engine.mount_view(&user).unwrap();
        let second = engine.mount_view(&user).unwrap();
        assert_eq!(engine.channel_state(), ChannelState::Open);

        drop(first);
        assert_eq!(backend.feed.active_count(), 1);
        drop(second);
        assert_eq!(backend.feed.active_count(), 0);
    }

    #[test]
    fn test_view_of_stopped_sync_does_not_stop_next_one() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);
        let user = UserId::from("u1");

        let stale = engine.mount_view(&user).unwrap();
        engine.stop();
        let fresh = engine.mount_view(&user).unwrap();

        drop(stale);
        assert_eq!(engine.channel_state(), ChannelState::Open);
        drop(fresh);
        assert_eq!(engine.channel_state(), ChannelState::Closed);
    }

    #[test]
    fn test_stop_unless_keeps_served_user() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        let engine = engine(&backend);
        let user = UserId::from("u1");

        assert!(!engine.stop_unless(None));
        engine.start(&user).unwrap();
        assert!(!engine.stop_unless(Some(&user)));
        assert_eq!(engine.channel_state(), ChannelState::Open);

        assert!(engine.stop_unless(Some(&UserId::from("u2"))));
        assert_eq!(engine.channel_state(), ChannelState::Closed);
        assert!(engine.current_user().is_none());
    }

    #[test]
    fn test_unknown_sender_still_listed() {
        let backend = MemoryBackend::new();
        seed_users(&backend);
        backend.store.seed(
            "contact_requests",
            vec![
                request(1, "ghost", "u1", "2024-01-01T00:00:00Z"),
                row(json!({"id": 2, "receiver_id": "u1", "created_at": "not a date"})),
            ],
        );
        let engine = engine(&backend);

        engine.start(&UserId::from("u1")).unwrap();
        let records = engine.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sender_display_name, "");
        assert!(records[0].sender_avatar_url.is_none());
    }
}
