//! Prometheus metrics for the notification pipeline.
//!
//! Covers creation and suppression counts, per-channel delivery outcomes,
//! retry queue activity and unread-count cache effectiveness.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "carmarket_notifications";

lazy_static! {
    // ============================================================================
    // Creation Metrics
    // ============================================================================

    /// Total notifications created, by type
    pub static ref NOTIFICATIONS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_created_total", METRIC_PREFIX),
        "Total notifications created",
        &["type"]
    ).unwrap();

    /// Notifications suppressed by preference or quiet hours, by reason
    pub static ref NOTIFICATIONS_SUPPRESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_suppressed_total", METRIC_PREFIX),
        "Notifications suppressed before creation",
        &["reason"]
    ).unwrap();

    /// Notifications merged into an existing group instead of created
    pub static ref NOTIFICATIONS_GROUPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_grouped_total", METRIC_PREFIX),
        "Notifications merged into an existing unread group"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Delivery attempts by channel and outcome (sent, delivered, failed)
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_attempts_total", METRIC_PREFIX),
        "Delivery attempts by channel and outcome",
        &["channel", "outcome"]
    ).unwrap();

    /// Channel send latency in seconds
    pub static ref DELIVERY_SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_delivery_send_latency_seconds", METRIC_PREFIX),
        "Channel send latency",
        vec![0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Retry Metrics
    // ============================================================================

    /// Items scheduled into the retry queue
    pub static ref RETRY_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retry_scheduled_total", METRIC_PREFIX),
        "Deliveries scheduled for retry"
    ).unwrap();

    /// Retry attempts executed by the background engine
    pub static ref RETRY_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retry_attempts_total", METRIC_PREFIX),
        "Retry attempts executed"
    ).unwrap();

    /// Items dropped after exhausting the retry budget
    pub static ref DEAD_LETTER_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dead_letter_total", METRIC_PREFIX),
        "Notifications dead-lettered after exhausting retries"
    ).unwrap();

    /// Current retry queue depth
    pub static ref RETRY_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_retry_queue_depth", METRIC_PREFIX),
        "Current number of items in the retry queue"
    ).unwrap();

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Unread-count cache hits
    pub static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cache_hits_total", METRIC_PREFIX),
        "Unread-count cache hits"
    ).unwrap();

    /// Unread-count cache misses
    pub static ref CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cache_misses_total", METRIC_PREFIX),
        "Unread-count cache misses"
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
