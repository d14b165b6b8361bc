//! Background redelivery of failed in-app pushes.
//!
//! A single task owns the tick loop, so two scans can never overlap: the next
//! tick is not polled until the previous scan has fully completed. Items that
//! exhaust their retry budget are dead-lettered, which in this design is a
//! terminal log event plus a counter, not a queryable table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::delivery::{ChannelKind, DeliveryLogEntry, DeliveryLogStore, DeliveryStatus};
use crate::metrics::{DEAD_LETTER_TOTAL, RETRY_ATTEMPTS_TOTAL};
use crate::notification::NotificationStore;
use crate::transport::{ClientEvent, RealtimeTransport};

use super::queue::{RetryQueue, RetryQueueItem};

pub struct RetryEngine {
    queue: Arc<RetryQueue>,
    store: Arc<dyn NotificationStore>,
    delivery_log: Arc<dyn DeliveryLogStore>,
    transport: Arc<dyn RealtimeTransport>,
    tick_interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl RetryEngine {
    pub fn new(
        queue: Arc<RetryQueue>,
        store: Arc<dyn NotificationStore>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        transport: Arc<dyn RealtimeTransport>,
        tick_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            store,
            delivery_log,
            transport,
            tick_interval,
            shutdown,
        }
    }

    /// Run the retry loop until shutdown. In-memory queue state is lost with
    /// the process; that is a documented limitation, not a bug.
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.tick_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            max_retries = self.queue.policy().max_retries,
            "Retry engine started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Retry engine received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.process_due().await;
                }
            }
        }

        tracing::info!(
            pending = self.queue.len(),
            "Retry engine stopped; in-memory queue state discarded"
        );
    }

    /// Scan the queue once and attempt every due item. Exposed so tests can
    /// drive the engine deterministically without the timer.
    pub async fn process_due(&self) {
        let ready = self.queue.due_items(Utc::now());
        if ready.is_empty() {
            return;
        }

        tracing::debug!(ready = ready.len(), "Processing retry queue");
        for item in ready {
            self.retry_delivery(item).await;
        }
    }

    async fn retry_delivery(&self, item: RetryQueueItem) {
        RETRY_ATTEMPTS_TOTAL.inc();

        let notification = match self.store.find_by_id(item.notification_id).await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                tracing::warn!(
                    notification_id = %item.notification_id,
                    "Notification no longer exists, removing from retry queue"
                );
                self.queue.remove(item.notification_id);
                return;
            }
            Err(e) => {
                // Leave the item in place; the next tick sees it again
                tracing::error!(
                    notification_id = %item.notification_id,
                    error = %e,
                    "Failed to load notification for retry"
                );
                return;
            }
        };

        let push = self
            .transport
            .push_to_user(
                &item.user_id,
                ClientEvent::NewNotification { notification },
            )
            .await;

        match push {
            Ok(()) => {
                self.log_attempt(&item, DeliveryStatus::Delivered, None).await;
                self.queue.remove(item.notification_id);
                tracing::info!(
                    notification_id = %item.notification_id,
                    attempt = item.attempt_count + 1,
                    "Successfully retried notification delivery"
                );
            }
            Err(e) => {
                let error = e.to_string();
                self.log_attempt(&item, DeliveryStatus::Failed, Some(error.clone()))
                    .await;

                let attempt_count = item.attempt_count + 1;
                if attempt_count >= item.max_retries {
                    self.dead_letter(&item, &error);
                } else {
                    self.queue
                        .schedule(item.notification_id, &item.user_id, attempt_count);
                    tracing::warn!(
                        notification_id = %item.notification_id,
                        attempt = attempt_count,
                        max_retries = item.max_retries,
                        error = %error,
                        "Retry attempt failed, rescheduled"
                    );
                }
            }
        }
    }

    async fn log_attempt(
        &self,
        item: &RetryQueueItem,
        status: DeliveryStatus,
        error: Option<String>,
    ) {
        let entry = DeliveryLogEntry::outcome(
            item.notification_id,
            ChannelKind::InApp,
            status,
            item.attempt_count,
            error,
        );
        if let Err(e) = self.delivery_log.insert(&entry).await {
            tracing::error!(
                notification_id = %item.notification_id,
                error = %e,
                "Failed to log retry attempt"
            );
        }
    }

    /// Terminal state for an exhausted item. Nothing user-visible happens
    /// beyond this event; the notification record and any email/push attempts
    /// already exist independently.
    fn dead_letter(&self, item: &RetryQueueItem, error: &str) {
        DEAD_LETTER_TOTAL.inc();
        self.queue.remove(item.notification_id);
        tracing::error!(
            notification_id = %item.notification_id,
            user_id = %item.user_id,
            max_retries = item.max_retries,
            final_error = %error,
            "Notification exceeded max retries, dead-lettered"
        );
    }
}
