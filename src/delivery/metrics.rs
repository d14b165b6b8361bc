//! Delivery metrics summary and health evaluation.
//!
//! Computed on demand from the notification store and delivery log over a
//! trailing window, matching what operators see on the dashboard: volume,
//! unread backlog, delivery/failure rates, latency, and a bounded recent
//! activity feed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::delivery::log::DeliveryLogStore;
use crate::error::Result;
use crate::notification::NotificationStore;

/// Maximum entries in the recent-activity feed
const RECENT_ACTIVITY_LIMIT: usize = 100;

/// Failure-rate percentage above which the pipeline is unhealthy
const MAX_FAILURE_RATE: f64 = 5.0;

/// Delivery-rate percentage below which the pipeline is unhealthy
const MIN_DELIVERY_RATE: f64 = 95.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_notifications: u64,
    pub unread_notifications: u64,
    /// Percentage of delivery attempts that ended sent or delivered
    pub delivery_rate: f64,
    /// Percentage of delivery attempts that ended failed
    pub failure_rate: f64,
    pub average_delivery_time_ms: f64,
    pub notifications_by_type: HashMap<String, u64>,
    pub recent_activity: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
}

pub struct MetricsService {
    notifications: Arc<dyn NotificationStore>,
    delivery_log: Arc<dyn DeliveryLogStore>,
}

impl MetricsService {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        delivery_log: Arc<dyn DeliveryLogStore>,
    ) -> Self {
        Self {
            notifications,
            delivery_log,
        }
    }

    pub async fn summary(&self, window_hours: i64) -> Result<MetricsSummary> {
        let since = Utc::now() - Duration::hours(window_hours);

        let (total, unread, logs, by_type) = futures::try_join!(
            self.notifications.count_created_since(since),
            self.notifications.count_all_unread(),
            self.delivery_log.find_since(since),
            self.notifications.counts_by_type_since(since),
        )?;

        let attempts = logs.len();
        let successful = logs.iter().filter(|l| l.status.is_success()).count();
        let failed = logs
            .iter()
            .filter(|l| l.status == super::log::DeliveryStatus::Failed)
            .count();

        let delivery_rate = if attempts > 0 {
            successful as f64 / attempts as f64 * 100.0
        } else {
            100.0
        };
        let failure_rate = if attempts > 0 {
            failed as f64 / attempts as f64 * 100.0
        } else {
            0.0
        };

        let latencies: Vec<i64> = logs
            .iter()
            .filter_map(|l| {
                l.delivered_at
                    .map(|d| (d - l.attempted_at).num_milliseconds())
            })
            .collect();
        let average_delivery_time_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<i64>() as f64 / latencies.len() as f64
        };

        // The log is already newest-first; bound the feed
        let recent_activity = logs
            .iter()
            .take(RECENT_ACTIVITY_LIMIT)
            .map(|l| ActivityEntry {
                timestamp: l.attempted_at,
                channel: l.channel.to_string(),
                status: l.status.to_string(),
            })
            .collect();

        Ok(MetricsSummary {
            total_notifications: total,
            unread_notifications: unread,
            delivery_rate,
            failure_rate,
            average_delivery_time_ms,
            notifications_by_type: by_type
                .into_iter()
                .map(|(ty, count)| (ty.to_string(), count))
                .collect(),
            recent_activity,
        })
    }

    /// Evaluate delivery health over the last hour.
    pub async fn check_health(&self) -> Result<HealthReport> {
        let metrics = self.summary(1).await?;
        let mut issues = Vec::new();

        if metrics.failure_rate > MAX_FAILURE_RATE {
            issues.push(format!("High failure rate: {:.2}%", metrics.failure_rate));
        }
        if metrics.delivery_rate < MIN_DELIVERY_RATE {
            issues.push(format!("Low delivery rate: {:.2}%", metrics.delivery_rate));
        }

        Ok(HealthReport {
            healthy: issues.is_empty(),
            issues,
        })
    }
}
