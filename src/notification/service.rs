//! Notification creation, gating, grouping and read-state operations.
//!
//! This is the pipeline's orchestrating root. Creation is gated on in-app
//! preferences and quiet hours (suppression creates nothing and is not an
//! error), the real-time push failure path feeds the retry queue, and the
//! delivery orchestrator runs detached so email/push outcomes can never
//! affect the caller's result. Only the primary store write propagates.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::cache::CounterCache;
use crate::delivery::{
    ChannelKind, DeliveryLogEntry, DeliveryLogStore, DeliveryOrchestrator, DeliveryStatus,
};
use crate::error::{AppError, Result};
use crate::metrics::{
    DELIVERY_ATTEMPTS_TOTAL, NOTIFICATIONS_CREATED_TOTAL, NOTIFICATIONS_GROUPED_TOTAL,
    NOTIFICATIONS_SUPPRESSED_TOTAL,
};
use crate::preferences::PreferenceService;
use crate::retry::RetryQueue;
use crate::transport::{ClientEvent, RealtimeTransport, UpdateKind};

use super::store::{ListQuery, NotificationPage, NotificationStore};
use super::types::{Metadata, Notification, NotificationType};

/// Unread `new-message` notifications for the same conversation within this
/// window are updated in place instead of creating a new row.
const MESSAGE_GROUP_WINDOW_MINUTES: i64 = 5;

/// Default grouping window for inquiry/system notifications.
pub const DEFAULT_GROUP_WINDOW_MINUTES: i64 = 60;

fn unread_count_key(user_id: &str) -> String {
    format!("unread_count:{user_id}")
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    preferences: Arc<PreferenceService>,
    cache: Arc<CounterCache>,
    transport: Arc<dyn RealtimeTransport>,
    retry_queue: Arc<RetryQueue>,
    delivery_log: Arc<dyn DeliveryLogStore>,
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        preferences: Arc<PreferenceService>,
        cache: Arc<CounterCache>,
        transport: Arc<dyn RealtimeTransport>,
        retry_queue: Arc<RetryQueue>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        orchestrator: Arc<DeliveryOrchestrator>,
    ) -> Self {
        Self {
            store,
            preferences,
            cache,
            transport,
            retry_queue,
            delivery_log,
            orchestrator,
        }
    }

    /// Create a notification for a user, honoring preferences and quiet
    /// hours. Returns `Ok(None)` when policy suppresses creation entirely.
    #[tracing::instrument(
        name = "notifications.create",
        skip(self, title, message, metadata),
        fields(user_id = %user_id, notification_type = %notification_type)
    )]
    pub async fn create_notification(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        related_listing_id: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Option<Notification>> {
        if !self
            .preferences
            .is_enabled(user_id, notification_type, ChannelKind::InApp)
            .await?
        {
            tracing::debug!("Skipping notification, in-app channel disabled");
            NOTIFICATIONS_SUPPRESSED_TOTAL
                .with_label_values(&["preference_disabled"])
                .inc();
            return Ok(None);
        }

        if self.preferences.is_quiet_hours(user_id).await? {
            tracing::debug!("Skipping notification, quiet hours active");
            NOTIFICATIONS_SUPPRESSED_TOTAL
                .with_label_values(&["quiet_hours"])
                .inc();
            return Ok(None);
        }

        let notification = Notification::new(
            user_id,
            notification_type,
            title,
            message,
            related_listing_id,
            metadata,
        );

        // The primary write is the only operation allowed to fail the caller
        self.store.insert(&notification).await?;
        NOTIFICATIONS_CREATED_TOTAL
            .with_label_values(&[notification_type.as_str()])
            .inc();
        self.cache.invalidate(&unread_count_key(user_id));

        self.push_with_retry_on_failure(&notification).await;
        self.spawn_channel_delivery(notification.clone());

        Ok(Some(notification))
    }

    /// Dedup/grouping for chat messages: an unread `new-message` notification
    /// for the same conversation within the last five minutes is updated in
    /// place; otherwise a fresh notification starts a new group.
    pub async fn update_or_create_message_notification(
        &self,
        user_id: &str,
        conversation_id: &str,
        sender_name: &str,
        related_listing_id: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Option<Notification>> {
        let since = Utc::now() - Duration::minutes(MESSAGE_GROUP_WINDOW_MINUTES);

        let existing = self
            .store
            .find_unread_message_for_conversation(user_id, conversation_id, since)
            .await?;

        if let Some(mut existing) = existing {
            let message_count = existing
                .metadata
                .as_ref()
                .and_then(Metadata::message_count)
                .unwrap_or(1)
                + 1;

            existing.message = if message_count > 1 {
                format!("{message_count} new messages from {sender_name}")
            } else {
                format!("New message from {sender_name}")
            };

            let bag = existing.metadata_mut();
            if let Some(extra) = &metadata {
                bag.merge(extra);
            }
            bag.set_message_count(message_count);
            bag.set_conversation_id(conversation_id);

            existing.ensure_group_id();
            existing.updated_at = Utc::now();
            self.store.update(&existing).await?;
            NOTIFICATIONS_GROUPED_TOTAL.inc();

            self.push_with_retry_on_failure(&existing).await;
            return Ok(Some(existing));
        }

        let mut bag = metadata.unwrap_or_default();
        bag.set_message_count(1);
        bag.set_conversation_id(conversation_id);

        let created = self
            .create_notification(
                user_id,
                NotificationType::NewMessage,
                "New Message",
                &format!("New message from {sender_name}"),
                related_listing_id,
                Some(bag),
            )
            .await?;

        match created {
            Some(mut notification) => {
                // The first message of a thread roots its own group
                notification.ensure_group_id();
                self.store.update(&notification).await?;
                Ok(Some(notification))
            }
            None => Ok(None),
        }
    }

    /// Collapse repeated inquiry/system notifications into one unread row
    /// within the grouping window. Non-groupable types create normally.
    pub async fn group_or_create_notification(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        related_listing_id: Option<String>,
        metadata: Option<Metadata>,
        window_minutes: Option<i64>,
    ) -> Result<Option<Notification>> {
        if !notification_type.is_groupable() {
            return self
                .create_notification(
                    user_id,
                    notification_type,
                    title,
                    message,
                    related_listing_id,
                    metadata,
                )
                .await;
        }

        let window = window_minutes.unwrap_or(DEFAULT_GROUP_WINDOW_MINUTES);
        let since = Utc::now() - Duration::minutes(window);

        let existing = self
            .store
            .find_unread_of_type(user_id, notification_type, since)
            .await?;

        if let Some(mut existing) = existing {
            let count = existing
                .metadata
                .as_ref()
                .and_then(Metadata::count)
                .unwrap_or(1)
                + 1;

            existing.message = match notification_type {
                NotificationType::NewInquiry => format!("{count} new inquiries"),
                _ => format!("{count} system notifications"),
            };

            let bag = existing.metadata_mut();
            if let Some(extra) = &metadata {
                bag.merge(extra);
            }
            bag.set_count(count);

            existing.ensure_group_id();
            existing.updated_at = Utc::now();
            self.store.update(&existing).await?;
            NOTIFICATIONS_GROUPED_TOTAL.inc();

            // Lightweight refresh of the grouped row; no retry on failure
            if let Err(e) = self
                .transport
                .push_to_user(
                    user_id,
                    ClientEvent::NewNotification {
                        notification: existing.clone(),
                    },
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to push grouped notification update");
            } else {
                self.push_unread_count(user_id).await;
            }

            return Ok(Some(existing));
        }

        let mut bag = metadata.unwrap_or_default();
        bag.set_count(1);

        let created = self
            .create_notification(
                user_id,
                notification_type,
                title,
                message,
                related_listing_id,
                Some(bag),
            )
            .await?;

        match created {
            Some(mut notification) => {
                notification.ensure_group_id();
                self.store.update(&notification).await?;
                Ok(Some(notification))
            }
            None => Ok(None),
        }
    }

    /// Cache-first unread count. The cache is best-effort: a miss reads
    /// through to the store and repopulates.
    pub async fn get_unread_count(&self, user_id: &str) -> Result<u64> {
        let key = unread_count_key(user_id);
        if let Some(count) = self.cache.get(&key) {
            return Ok(count);
        }

        let count = self.store.count_unread(user_id).await?;
        self.cache.set(&key, count);
        Ok(count)
    }

    pub async fn list_notifications(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<NotificationPage> {
        Ok(self.store.list(user_id, query).await?)
    }

    pub async fn mark_as_read(&self, notification_id: Uuid, user_id: &str) -> Result<()> {
        let updated = self.store.mark_read(notification_id, user_id).await?;
        if !updated {
            tracing::warn!(
                notification_id = %notification_id,
                user_id = %user_id,
                "Attempted to mark non-existent notification as read"
            );
            return Err(AppError::NotFound("Notification not found".to_string()));
        }

        self.cache.invalidate(&unread_count_key(user_id));
        self.push_state_change(user_id, UpdateKind::Read, notification_id)
            .await;
        Ok(())
    }

    /// Bulk read. A no-op on an empty match, never an error.
    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<u64> {
        let affected = self.store.mark_all_read(user_id).await?;
        self.cache.invalidate(&unread_count_key(user_id));
        self.push_unread_count(user_id).await;
        Ok(affected)
    }

    pub async fn delete_notification(&self, notification_id: Uuid, user_id: &str) -> Result<()> {
        let deleted = self.store.delete(notification_id, user_id).await?;
        if !deleted {
            tracing::warn!(
                notification_id = %notification_id,
                user_id = %user_id,
                "Attempted to delete non-existent notification"
            );
            return Err(AppError::NotFound("Notification not found".to_string()));
        }

        self.cache.invalidate(&unread_count_key(user_id));
        self.push_state_change(user_id, UpdateKind::Deleted, notification_id)
            .await;
        Ok(())
    }

    /// Hard-delete read notifications older than the cutoff.
    pub async fn archive_old_notifications(&self, days_old: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days_old);
        let affected = self.store.delete_read_older_than(cutoff).await?;
        tracing::info!(affected = affected, days_old = days_old, "Archived old notifications");
        Ok(affected)
    }

    /// Push the full notification; a failure logs a failed in-app attempt and
    /// hands the notification to the retry engine.
    async fn push_with_retry_on_failure(&self, notification: &Notification) {
        let user_id = &notification.user_id;

        match self
            .transport
            .push_to_user(
                user_id,
                ClientEvent::NewNotification {
                    notification: notification.clone(),
                },
            )
            .await
        {
            Ok(()) => {
                DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&[ChannelKind::InApp.as_str(), "delivered"])
                    .inc();
                self.push_unread_count(user_id).await;
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %notification.id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to push notification over realtime transport"
                );
                DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&[ChannelKind::InApp.as_str(), "failed"])
                    .inc();

                let entry = DeliveryLogEntry::outcome(
                    notification.id,
                    ChannelKind::InApp,
                    DeliveryStatus::Failed,
                    0,
                    Some(e.to_string()),
                );
                if let Err(log_err) = self.delivery_log.insert(&entry).await {
                    tracing::error!(
                        notification_id = %notification.id,
                        error = %log_err,
                        "Failed to log in-app delivery failure"
                    );
                }

                self.retry_queue.schedule(notification.id, user_id, 0);
            }
        }
    }

    /// Detached email/push delivery; outcomes never reach the caller.
    fn spawn_channel_delivery(&self, notification: Notification) {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let user_id = notification.user_id.clone();
            orchestrator.deliver(&notification, &user_id).await;
        });
    }

    async fn push_state_change(&self, user_id: &str, kind: UpdateKind, notification_id: Uuid) {
        let push = self
            .transport
            .push_to_user(
                user_id,
                ClientEvent::NotificationUpdate {
                    update_type: kind,
                    notification_id,
                },
            )
            .await;

        if let Err(e) = push {
            // The store mutation already succeeded; this is cosmetic
            tracing::warn!(
                notification_id = %notification_id,
                error = %e,
                "Failed to push notification state change"
            );
            return;
        }

        self.push_unread_count(user_id).await;
    }

    async fn push_unread_count(&self, user_id: &str) {
        let count = match self.get_unread_count(user_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to load unread count");
                return;
            }
        };

        if let Err(e) = self
            .transport
            .push_to_user(user_id, ClientEvent::UnreadCountUpdate { count })
            .await
        {
            tracing::debug!(user_id = %user_id, error = %e, "Failed to push unread count");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    use crate::delivery::MemoryDeliveryLogStore;
    use crate::identity::MemoryUserDirectory;
    use crate::notification::MemoryNotificationStore;
    use crate::preferences::{ChannelOverride, MemoryPreferenceStore};
    use crate::retry::RetryPolicy;
    use crate::transport::SessionTransport;

    struct Harness {
        service: NotificationService,
        store: Arc<MemoryNotificationStore>,
        preferences: Arc<PreferenceService>,
        transport: Arc<SessionTransport>,
        retry_queue: Arc<RetryQueue>,
        delivery_log: Arc<MemoryDeliveryLogStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryNotificationStore::new());
        let preferences = Arc::new(PreferenceService::new(Arc::new(
            MemoryPreferenceStore::new(),
        )));
        let cache = Arc::new(CounterCache::new(StdDuration::from_secs(60)));
        let transport = Arc::new(SessionTransport::new());
        let retry_queue = Arc::new(RetryQueue::new(RetryPolicy::default()));
        let delivery_log = Arc::new(MemoryDeliveryLogStore::new());
        let orchestrator = Arc::new(DeliveryOrchestrator::new(
            Arc::new(MemoryUserDirectory::new()),
            preferences.clone(),
            delivery_log.clone(),
            vec![],
            StdDuration::from_secs(5),
        ));

        let service = NotificationService::new(
            store.clone(),
            preferences.clone(),
            cache,
            transport.clone(),
            retry_queue.clone(),
            delivery_log.clone(),
            orchestrator,
        );

        Harness {
            service,
            store,
            preferences,
            transport,
            retry_queue,
            delivery_log,
        }
    }

    #[tokio::test]
    async fn test_disabled_preference_suppresses_creation() {
        let h = harness();

        let overrides = HashMap::from([(
            NotificationType::NewMessage,
            ChannelOverride {
                in_app: Some(false),
                ..Default::default()
            },
        )]);
        h.preferences
            .update_preferences("user-1", Some(overrides), None)
            .await
            .unwrap();

        let created = h
            .service
            .create_notification(
                "user-1",
                NotificationType::NewMessage,
                "New Message",
                "New message from Alice",
                None,
                None,
            )
            .await
            .unwrap();

        assert!(created.is_none());
        assert!(h.store.is_empty());
        assert!(h.retry_queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_logs_and_enqueues_retry() {
        let h = harness();
        // No registered session: the realtime push fails

        let created = h
            .service
            .create_notification(
                "user-1",
                NotificationType::System,
                "Maintenance",
                "Scheduled maintenance tonight",
                None,
                None,
            )
            .await
            .unwrap()
            .unwrap();

        let item = h.retry_queue.get(created.id).expect("retry item");
        assert_eq!(item.attempt_count, 0);

        let rows = h
            .delivery_log
            .find_for_notification(created.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel, ChannelKind::InApp);
        assert_eq!(rows[0].status, DeliveryStatus::Failed);
        assert_eq!(rows[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_successful_push_reaches_session() {
        let h = harness();
        let mut rx = h.transport.register("user-1", 8);

        let created = h
            .service
            .create_notification(
                "user-1",
                NotificationType::NewInquiry,
                "New Inquiry",
                "Someone asked about your listing",
                Some("listing-7".to_string()),
                None,
            )
            .await
            .unwrap()
            .unwrap();

        // Full notification first, then the unread count
        match rx.recv().await.unwrap() {
            ClientEvent::NewNotification { notification } => {
                assert_eq!(notification.id, created.id);
            }
            other => panic!("expected NewNotification, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ClientEvent::UnreadCountUpdate { count } => assert_eq!(count, 1),
            other => panic!("expected UnreadCountUpdate, got {other:?}"),
        }

        assert!(h.retry_queue.is_empty());
    }

    #[tokio::test]
    async fn test_message_grouping_updates_in_place() {
        let h = harness();

        for _ in 0..3 {
            h.service
                .update_or_create_message_notification("user-1", "conv-1", "Alice", None, None)
                .await
                .unwrap();
        }

        assert_eq!(h.store.len(), 1);
        let page = h
            .service
            .list_notifications("user-1", &ListQuery::default())
            .await
            .unwrap();
        let grouped = &page.notifications[0];
        assert_eq!(grouped.message, "3 new messages from Alice");
        assert_eq!(
            grouped.metadata.as_ref().unwrap().message_count(),
            Some(3)
        );
        assert_eq!(grouped.group_id, Some(grouped.id));
    }

    #[tokio::test]
    async fn test_message_grouping_is_per_conversation() {
        let h = harness();

        h.service
            .update_or_create_message_notification("user-1", "conv-1", "Alice", None, None)
            .await
            .unwrap();
        h.service
            .update_or_create_message_notification("user-1", "conv-2", "Bob", None, None)
            .await
            .unwrap();

        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn test_group_or_create_passthrough_for_non_groupable() {
        let h = harness();

        for _ in 0..2 {
            h.service
                .group_or_create_notification(
                    "user-1",
                    NotificationType::ListingSold,
                    "Listing Sold",
                    "Your listing sold",
                    None,
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn test_group_or_create_collapses_inquiries() {
        let h = harness();

        for _ in 0..3 {
            h.service
                .group_or_create_notification(
                    "user-1",
                    NotificationType::NewInquiry,
                    "New Inquiry",
                    "New inquiry about your listing",
                    None,
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        assert_eq!(h.store.len(), 1);
        let page = h
            .service
            .list_notifications("user-1", &ListQuery::default())
            .await
            .unwrap();
        let grouped = &page.notifications[0];
        assert_eq!(grouped.message, "3 new inquiries");
        assert_eq!(grouped.metadata.as_ref().unwrap().count(), Some(3));
    }

    #[tokio::test]
    async fn test_mark_as_read_invalidates_cache_within_ttl() {
        let h = harness();

        let created = h
            .service
            .create_notification(
                "user-1",
                NotificationType::System,
                "Maintenance",
                "Scheduled maintenance tonight",
                None,
                None,
            )
            .await
            .unwrap()
            .unwrap();

        // Warm the cache
        assert_eq!(h.service.get_unread_count("user-1").await.unwrap(), 1);

        h.service.mark_as_read(created.id, "user-1").await.unwrap();

        // Within the 60s TTL, the decrement must still be visible
        assert_eq!(h.service.get_unread_count("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_single_item_operations_fail_on_missing_rows() {
        let h = harness();

        let missing = Uuid::new_v4();
        assert!(matches!(
            h.service.mark_as_read(missing, "user-1").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.service.delete_notification(missing, "user-1").await,
            Err(AppError::NotFound(_))
        ));

        // Bulk operation never fails on an empty match
        assert_eq!(h.service.mark_all_as_read("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_archive_reports_affected_count() {
        let h = harness();

        let created = h
            .service
            .create_notification(
                "user-1",
                NotificationType::System,
                "Old news",
                "This happened a while ago",
                None,
                None,
            )
            .await
            .unwrap()
            .unwrap();
        h.service.mark_as_read(created.id, "user-1").await.unwrap();

        // Recent rows survive a 90-day archive
        assert_eq!(h.service.archive_old_notifications(90).await.unwrap(), 0);
        // A zero-day cutoff removes every read row
        assert_eq!(h.service.archive_old_notifications(0).await.unwrap(), 1);
    }
}
