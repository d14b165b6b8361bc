//! End-to-end pipeline scenarios over the memory backends: preference and
//! quiet-hours gating, grouping windows, retry/dead-letter flow, cache
//! invalidation and cursor pagination stability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Local, Timelike, Utc};
use tokio::sync::broadcast;

use carmarket_notification_service::config::{
    CacheConfig, DeliveryConfig, PushConfig, RetryConfig, ServerConfig, Settings, SmtpConfig,
    StoreConfig,
};
use carmarket_notification_service::delivery::{
    ChannelKind, DeliveryLogStore, DeliveryStatus, MemoryDeliveryLogStore,
};
use carmarket_notification_service::identity::{ContactRecord, MemoryUserDirectory};
use carmarket_notification_service::notification::{
    Cursor, ListQuery, MemoryNotificationStore, NotificationStore, NotificationType,
};
use carmarket_notification_service::preferences::{ChannelOverride, QuietHours};
use carmarket_notification_service::retry::{RetryEngine, RetryPolicy, RetryQueue};
use carmarket_notification_service::server::{AppState, Backends};
use carmarket_notification_service::transport::{ClientEvent, RealtimeTransport};

fn test_settings() -> Settings {
    Settings {
        server: ServerConfig::default(),
        store: StoreConfig::default(),
        smtp: SmtpConfig::default(),
        push: PushConfig::default(),
        retry: RetryConfig::default(),
        delivery: DeliveryConfig::default(),
        cache: CacheConfig::default(),
    }
}

struct Pipeline {
    state: AppState,
    notification_store: Arc<MemoryNotificationStore>,
    delivery_log: Arc<MemoryDeliveryLogStore>,
}

fn pipeline() -> Pipeline {
    let notification_store = Arc::new(MemoryNotificationStore::new());
    let delivery_log = Arc::new(MemoryDeliveryLogStore::new());

    let backends = Backends {
        notifications: notification_store.clone(),
        delivery_log: delivery_log.clone(),
        preferences: Arc::new(
            carmarket_notification_service::preferences::MemoryPreferenceStore::new(),
        ),
    };

    let directory = Arc::new(MemoryUserDirectory::new());
    directory.insert(ContactRecord {
        user_id: "user-a".to_string(),
        email: "user-a@example.com".to_string(),
        email_verified: true,
    });

    let state = AppState::new(test_settings(), backends, directory);
    Pipeline {
        state,
        notification_store,
        delivery_log,
    }
}

/// Local wall-clock time shifted by `offset_minutes`, formatted as "HH:mm".
fn local_hhmm(offset_minutes: i64) -> String {
    let t = Local::now() + Duration::minutes(offset_minutes);
    format!("{:02}:{:02}", t.hour(), t.minute())
}

#[tokio::test]
async fn disabled_preference_creates_nothing() {
    let p = pipeline();

    let overrides = HashMap::from([(
        NotificationType::NewMessage,
        ChannelOverride {
            in_app: Some(false),
            ..Default::default()
        },
    )]);
    p.state
        .preferences
        .update_preferences("user-a", Some(overrides), None)
        .await
        .unwrap();

    let created = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::NewMessage,
            "New Message",
            "New message from Alice",
            None,
            None,
        )
        .await
        .unwrap();

    assert!(created.is_none());
    assert!(p.notification_store.is_empty());
    assert!(p.state.retry_queue.is_empty());
}

#[tokio::test]
async fn quiet_hours_suppress_creation_entirely() {
    let p = pipeline();

    // A window straddling the current local time, wrapping midnight when the
    // clock is near it
    p.state
        .preferences
        .update_preferences(
            "user-a",
            None,
            Some(Some(QuietHours {
                enabled: true,
                start: local_hhmm(-60),
                end: local_hhmm(60),
                timezone: Some("UTC".to_string()),
            })),
        )
        .await
        .unwrap();

    let suppressed = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::System,
            "Maintenance",
            "Scheduled maintenance tonight",
            None,
            None,
        )
        .await
        .unwrap();
    assert!(suppressed.is_none());
    assert!(p.notification_store.is_empty());

    // Move the window strictly into the future: creation resumes
    p.state
        .preferences
        .update_preferences(
            "user-a",
            None,
            Some(Some(QuietHours {
                enabled: true,
                start: local_hhmm(120),
                end: local_hhmm(180),
                timezone: Some("UTC".to_string()),
            })),
        )
        .await
        .unwrap();

    let created = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::System,
            "Maintenance",
            "Scheduled maintenance tonight",
            None,
            None,
        )
        .await
        .unwrap();
    assert!(created.is_some());
}

#[tokio::test]
async fn message_grouping_is_idempotent_within_window() {
    let p = pipeline();

    for _ in 0..3 {
        p.state
            .notifications
            .update_or_create_message_notification("user-a", "conv-1", "Alice", None, None)
            .await
            .unwrap();
    }

    assert_eq!(p.notification_store.len(), 1);
    let page = p
        .state
        .notifications
        .list_notifications("user-a", &ListQuery::default())
        .await
        .unwrap();
    let grouped = &page.notifications[0];
    assert_eq!(grouped.message, "3 new messages from Alice");
    assert_eq!(grouped.metadata.as_ref().unwrap().message_count(), Some(3));
    assert_eq!(grouped.group_id, Some(grouped.id));
    // Grouping mutates in place: one unread row, not three
    assert_eq!(
        p.state.notifications.get_unread_count("user-a").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn message_grouping_window_boundary_creates_second_row() {
    let p = pipeline();

    let first = p
        .state
        .notifications
        .update_or_create_message_notification("user-a", "conv-1", "Alice", None, None)
        .await
        .unwrap()
        .unwrap();

    // Age the first notification past the five-minute window
    let mut aged = p
        .notification_store
        .find_by_id(first.id)
        .await
        .unwrap()
        .unwrap();
    aged.created_at = Utc::now() - Duration::minutes(6);
    p.notification_store.update(&aged).await.unwrap();

    let second = p
        .state
        .notifications
        .update_or_create_message_notification("user-a", "conv-1", "Alice", None, None)
        .await
        .unwrap()
        .unwrap();

    // Still unread, same conversation, but outside the window: a new thread
    assert_ne!(second.id, first.id);
    assert_eq!(p.notification_store.len(), 2);
    assert_eq!(second.metadata.as_ref().unwrap().message_count(), Some(1));
}

#[tokio::test]
async fn retry_backoff_ladder_and_dead_letter() {
    // Deltas of the scheduled retry times follow 1s, 2s, 4s, 8s, 16s
    let policy = RetryPolicy::default();
    let now = Utc::now();
    let expected = [1_000, 2_000, 4_000, 8_000, 16_000];
    for (attempt, expected_ms) in expected.iter().enumerate() {
        let delta = policy.next_retry_at(attempt as u32, now) - now;
        assert_eq!(delta.num_milliseconds(), *expected_ms);
    }
    // The cap holds far beyond the retry budget
    assert_eq!(policy.delay_ms(10), 300_000);

    // Five consecutive failures dead-letter the item and leave five failed
    // in-app rows
    let queue = Arc::new(RetryQueue::new(RetryPolicy {
        base_delay_ms: 0,
        max_delay_ms: 0,
        max_retries: 5,
    }));
    let store = Arc::new(MemoryNotificationStore::new());
    let delivery_log = Arc::new(MemoryDeliveryLogStore::new());
    let transport = Arc::new(OfflineTransport);
    let (_tx, shutdown) = broadcast::channel(1);

    let engine = RetryEngine::new(
        queue.clone(),
        store.clone(),
        delivery_log.clone(),
        transport,
        StdDuration::from_secs(10),
        shutdown,
    );

    let n = carmarket_notification_service::notification::Notification::new(
        "user-a",
        NotificationType::NewMessage,
        "New Message",
        "New message from Alice",
        None,
        None,
    );
    store.insert(&n).await.unwrap();
    queue.schedule(n.id, "user-a", 0);

    for _ in 0..5 {
        engine.process_due().await;
    }

    assert!(queue.is_empty());
    let rows = delivery_log.find_for_notification(n.id).await.unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.status == DeliveryStatus::Failed));
    // One row per attempt, retry counts 0 through 4
    let mut counts: Vec<u32> = rows.iter().map(|r| r.retry_count).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![0, 1, 2, 3, 4]);
}

struct OfflineTransport;

#[async_trait::async_trait]
impl RealtimeTransport for OfflineTransport {
    async fn push_to_user(
        &self,
        user_id: &str,
        _event: ClientEvent,
    ) -> Result<(), carmarket_notification_service::transport::TransportError> {
        Err(carmarket_notification_service::transport::TransportError::Offline(
            user_id.to_string(),
        ))
    }
}

#[tokio::test]
async fn unread_count_reflects_mark_read_within_cache_ttl() {
    let p = pipeline();

    let created = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::NewInquiry,
            "New Inquiry",
            "Someone asked about your listing",
            None,
            None,
        )
        .await
        .unwrap()
        .unwrap();

    // Warm the cache, then mutate
    assert_eq!(
        p.state.notifications.get_unread_count("user-a").await.unwrap(),
        1
    );
    p.state
        .notifications
        .mark_as_read(created.id, "user-a")
        .await
        .unwrap();

    // The 60s TTL has not elapsed; the decrement must come from invalidation
    assert_eq!(
        p.state.notifications.get_unread_count("user-a").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn cursor_pagination_is_stable_under_concurrent_insert() {
    let p = pipeline();
    let mut rx = p.state.transport.register("user-a", 64);

    for i in 0..5 {
        p.state
            .notifications
            .create_notification(
                "user-a",
                NotificationType::System,
                "Update",
                &format!("System update {i}"),
                None,
                None,
            )
            .await
            .unwrap();
        // Keep creation times strictly ordered at millisecond precision
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }

    let first_page = p
        .state
        .notifications
        .list_notifications(
            "user-a",
            &ListQuery {
                limit: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let first_ids: Vec<_> = first_page.notifications.iter().map(|n| n.id).collect();
    let last_seen = first_page.notifications.last().unwrap().clone();

    // A new notification lands between the two fetches
    p.state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::System,
            "Update",
            "System update concurrent",
            None,
            None,
        )
        .await
        .unwrap();

    let second_page = p
        .state
        .notifications
        .list_notifications(
            "user-a",
            &ListQuery {
                limit: 2,
                cursor: Cursor::decode(&format!(
                    "{}_{}",
                    last_seen.created_at.timestamp_millis(),
                    last_seen.id
                )),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // No duplicates, no skips: strictly older than the cursor position
    assert_eq!(second_page.notifications.len(), 2);
    for n in &second_page.notifications {
        assert!(!first_ids.contains(&n.id));
        assert!(n.created_at < last_seen.created_at);
    }
    assert!(second_page.total.is_none());

    // Drain the session buffer so the channel is not dropped early
    while rx.try_recv().is_ok() {}
}

#[tokio::test]
async fn role_assignment_end_to_end() {
    let p = pipeline();

    // Online path: the full notification and unread count arrive in order
    let mut rx = p.state.transport.register("user-a", 8);
    let created = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::RoleAssigned,
            "New Role Assigned",
            "You are now a moderator",
            None,
            None,
        )
        .await
        .unwrap()
        .expect("role-assigned inherits in-app enablement from system defaults");

    match rx.recv().await.unwrap() {
        ClientEvent::NewNotification { notification } => {
            assert_eq!(notification.id, created.id);
            assert_eq!(
                notification.notification_type,
                NotificationType::RoleAssigned
            );
        }
        other => panic!("expected NewNotification, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        ClientEvent::UnreadCountUpdate { count } => assert_eq!(count, 1),
        other => panic!("expected UnreadCountUpdate, got {other:?}"),
    }
    assert!(p.state.retry_queue.is_empty());

    // Offline path: the push fails, exactly one retry item with attempt 0
    p.state.transport.unregister("user-a");
    let second = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::RoleAssigned,
            "New Role Assigned",
            "You are now an admin",
            None,
            None,
        )
        .await
        .unwrap()
        .unwrap();

    let item = p.state.retry_queue.get(second.id).expect("retry item");
    assert_eq!(item.attempt_count, 0);
    assert_eq!(p.state.retry_queue.len(), 1);

    // Give the detached orchestrator time to run; email and push are both
    // disabled for system-derived types, so no rows may appear
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    let rows = p.delivery_log.find_for_notification(created.id).await.unwrap();
    assert!(rows.is_empty());

    // The offline creation logged exactly one failed in-app attempt
    let rows = p.delivery_log.find_for_notification(second.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel, ChannelKind::InApp);
    assert_eq!(rows[0].status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn retry_engine_recovers_when_session_returns() {
    let p = pipeline();

    // Created while offline: lands in the retry queue
    let created = p
        .state
        .notifications
        .create_notification(
            "user-a",
            NotificationType::NewMessage,
            "New Message",
            "New message from Alice",
            None,
            None,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p.state.retry_queue.len(), 1);

    // Drive the engine directly with a zero-delay queue clone of the item
    let queue = Arc::new(RetryQueue::new(RetryPolicy {
        base_delay_ms: 0,
        max_delay_ms: 0,
        max_retries: 5,
    }));
    queue.schedule(created.id, "user-a", 0);

    let (_tx, shutdown) = broadcast::channel(1);
    let engine = RetryEngine::new(
        queue.clone(),
        p.notification_store.clone(),
        p.delivery_log.clone(),
        p.state.transport.clone(),
        StdDuration::from_secs(10),
        shutdown,
    );

    // User reconnects; the retried push now succeeds
    let mut rx = p.state.transport.register("user-a", 8);
    engine.process_due().await;

    assert!(queue.is_empty());
    match rx.recv().await.unwrap() {
        ClientEvent::NewNotification { notification } => {
            assert_eq!(notification.id, created.id);
        }
        other => panic!("expected NewNotification, got {other:?}"),
    }

    let rows = p.delivery_log.find_for_notification(created.id).await.unwrap();
    // One failed row from creation, one delivered row from the retry
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.status == DeliveryStatus::Delivered));
    assert!(rows.iter().any(|r| r.status == DeliveryStatus::Failed));
}

#[tokio::test]
async fn grouped_inquiries_collapse_and_expire() {
    let p = pipeline();

    for _ in 0..2 {
        p.state
            .notifications
            .group_or_create_notification(
                "user-a",
                NotificationType::NewInquiry,
                "New Inquiry",
                "New inquiry about your listing",
                Some("listing-9".to_string()),
                None,
                None,
            )
            .await
            .unwrap();
    }
    assert_eq!(p.notification_store.len(), 1);

    // Age the grouped row past the custom window; the next inquiry starts a
    // fresh group even though the old one is still unread
    let page = p
        .state
        .notifications
        .list_notifications("user-a", &ListQuery::default())
        .await
        .unwrap();
    let mut aged = page.notifications[0].clone();
    aged.created_at = Utc::now() - Duration::minutes(30);
    p.notification_store.update(&aged).await.unwrap();

    p.state
        .notifications
        .group_or_create_notification(
            "user-a",
            NotificationType::NewInquiry,
            "New Inquiry",
            "New inquiry about your listing",
            Some("listing-9".to_string()),
            None,
            Some(15),
        )
        .await
        .unwrap();

    assert_eq!(p.notification_store.len(), 2);
}
