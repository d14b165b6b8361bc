//! In-memory retry queue for failed real-time deliveries.
//!
//! Process-local state: items do not survive a restart. The queue is shared
//! between request handlers (enqueue on push failure) and the single retry
//! engine task (scan/reschedule/remove); DashMap keeps the two sides safe
//! without a coarse lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::metrics::{RETRY_QUEUE_DEPTH, RETRY_SCHEDULED_TOTAL};

/// Backoff policy: `delay = min(base * 2^attempt_count, max)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn delay_ms(&self, attempt_count: u32) -> u64 {
        // 2^20 * base is already far past any sensible cap
        let exponent = attempt_count.min(20);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    pub fn next_retry_at(&self, attempt_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + ChronoDuration::milliseconds(self.delay_ms(attempt_count) as i64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            max_retries: 5,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            max_retries: config.max_retries,
        }
    }
}

/// One failed delivery awaiting redelivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueItem {
    pub notification_id: Uuid,
    pub user_id: String,
    pub attempt_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueStats {
    pub queue_size: usize,
    pub items: Vec<RetryQueueItem>,
}

/// The retry queue itself, keyed by notification id.
pub struct RetryQueue {
    items: DashMap<Uuid, RetryQueueItem>,
    policy: RetryPolicy,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            items: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Schedule (or reschedule) a delivery for retry. `attempt_count` is the
    /// number of attempts already made; the backoff grows with it.
    pub fn schedule(&self, notification_id: Uuid, user_id: &str, attempt_count: u32) {
        let next_retry_at = self.policy.next_retry_at(attempt_count, Utc::now());
        let item = RetryQueueItem {
            notification_id,
            user_id: user_id.to_string(),
            attempt_count,
            next_retry_at,
            max_retries: self.policy.max_retries,
        };
        self.items.insert(notification_id, item);
        RETRY_SCHEDULED_TOTAL.inc();
        RETRY_QUEUE_DEPTH.set(self.items.len() as i64);

        tracing::debug!(
            notification_id = %notification_id,
            attempt = attempt_count + 1,
            max_retries = self.policy.max_retries,
            next_retry_at = %next_retry_at,
            "Scheduled notification for retry"
        );
    }

    /// Drop an item (successful delivery or dead-letter).
    pub fn remove(&self, notification_id: Uuid) -> bool {
        let removed = self.items.remove(&notification_id).is_some();
        if removed {
            RETRY_QUEUE_DEPTH.set(self.items.len() as i64);
            tracing::debug!(
                notification_id = %notification_id,
                "Removed notification from retry queue"
            );
        }
        removed
    }

    /// Items ready for redelivery at `now`, still within their retry budget.
    pub fn due_items(&self, now: DateTime<Utc>) -> Vec<RetryQueueItem> {
        self.items
            .iter()
            .filter(|item| item.next_retry_at <= now && item.attempt_count < item.max_retries)
            .map(|item| item.value().clone())
            .collect()
    }

    pub fn get(&self, notification_id: Uuid) -> Option<RetryQueueItem> {
        self.items.get(&notification_id).map(|i| i.value().clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> RetryQueueStats {
        RetryQueueStats {
            queue_size: self.items.len(),
            items: self.items.iter().map(|i| i.value().clone()).collect(),
        }
    }
}
