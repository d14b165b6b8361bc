//! Multi-channel delivery orchestration.
//!
//! Given a persisted notification, resolves the recipient's contact record,
//! gates each registered channel on preferences and availability, and writes
//! one delivery-log row per attempt. Failures never propagate: every error is
//! converted into a failed log row or a warning at this boundary. The in-app
//! channel is not orchestrated here; the notification service pushes it
//! synchronously and hands failures to the retry engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::identity::UserDirectory;
use crate::metrics::{DELIVERY_ATTEMPTS_TOTAL, DELIVERY_SEND_LATENCY};
use crate::notification::Notification;
use crate::preferences::PreferenceService;

use super::channel::{ChannelError, ChannelKind, NotificationChannel};
use super::log::{DeliveryLogEntry, DeliveryLogStore};

pub struct DeliveryOrchestrator {
    directory: Arc<dyn UserDirectory>,
    preferences: Arc<PreferenceService>,
    log_store: Arc<dyn DeliveryLogStore>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    send_timeout: Duration,
}

impl DeliveryOrchestrator {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        preferences: Arc<PreferenceService>,
        log_store: Arc<dyn DeliveryLogStore>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            preferences,
            log_store,
            channels,
            send_timeout,
        }
    }

    /// Deliver a notification through every enabled and available channel.
    #[tracing::instrument(
        name = "orchestrator.deliver",
        skip(self, notification),
        fields(notification_id = %notification.id, notification_type = %notification.notification_type)
    )]
    pub async fn deliver(&self, notification: &Notification, user_id: &str) {
        let Some(contact) = self.directory.find_contact(user_id).await else {
            tracing::warn!(user_id = %user_id, "User not found for notification delivery");
            return;
        };

        for channel in &self.channels {
            let kind = channel.kind();
            if kind == ChannelKind::InApp {
                continue;
            }

            let enabled = match self
                .preferences
                .is_enabled(user_id, notification.notification_type, kind)
                .await
            {
                Ok(enabled) => enabled,
                Err(e) => {
                    tracing::warn!(
                        channel = %kind,
                        error = %e,
                        "Preference lookup failed, skipping channel"
                    );
                    continue;
                }
            };

            // Email additionally requires a verified contact address
            let enabled = enabled && (kind != ChannelKind::Email || contact.email_verified);
            if !enabled {
                continue;
            }

            if !channel.is_available() {
                tracing::debug!(channel = %kind, "Channel unavailable, skipping");
                continue;
            }

            self.attempt(channel.as_ref(), &contact, notification).await;
        }
    }

    async fn attempt(
        &self,
        channel: &dyn NotificationChannel,
        contact: &crate::identity::ContactRecord,
        notification: &Notification,
    ) {
        let kind = channel.kind();
        let mut entry = DeliveryLogEntry::pending(notification.id, kind);
        if let Err(e) = self.log_store.insert(&entry).await {
            tracing::warn!(channel = %kind, error = %e, "Failed to record delivery attempt");
        }

        let started = Instant::now();
        let outcome = timeout(self.send_timeout, channel.send(contact, notification)).await;
        DELIVERY_SEND_LATENCY.observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(true)) => {
                entry.mark_sent();
                tracing::debug!(
                    channel = %kind,
                    notification_id = %notification.id,
                    "Channel delivery succeeded"
                );
            }
            Ok(Ok(false)) => {
                entry.mark_failed("channel reported delivery failure");
            }
            Ok(Err(e)) => {
                entry.mark_failed(e.to_string());
            }
            Err(_) => {
                entry.mark_failed(ChannelError::Timeout(self.send_timeout.as_secs()).to_string());
            }
        }

        if entry.status.is_success() {
            DELIVERY_ATTEMPTS_TOTAL
                .with_label_values(&[kind.as_str(), "sent"])
                .inc();
        } else {
            DELIVERY_ATTEMPTS_TOTAL
                .with_label_values(&[kind.as_str(), "failed"])
                .inc();
            tracing::warn!(
                channel = %kind,
                notification_id = %notification.id,
                error = entry.error.as_deref().unwrap_or("unknown"),
                "Channel delivery failed"
            );
        }

        if let Err(e) = self.log_store.update(&entry).await {
            tracing::warn!(channel = %kind, error = %e, "Failed to update delivery log entry");
        }
    }

    /// Attempt history for one notification, newest first.
    pub async fn delivery_status(
        &self,
        notification_id: uuid::Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, crate::error::StoreError> {
        self.log_store.find_for_notification(notification_id).await
    }
}
