use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::notification::{Cursor, ListQuery, Metadata, Notification, NotificationType};
use crate::preferences::{ChannelOverride, PreferenceRecord, QuietHours};
use crate::server::AppState;

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

/// Distinguishes an absent `quietHours` field (leave untouched) from an
/// explicit `null` (clear the window).
fn double_option<'de, D>(deserializer: D) -> std::result::Result<Option<Option<QuietHours>>, D::Error>
where
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

// ============================================================================
// Inbound triggers (chat, moderation, RBAC collaborators)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_listing_id: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotificationRequest {
    pub user_id: String,
    pub conversation_id: String,
    pub sender_name: String,
    pub related_listing_id: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNotificationRequest {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_listing_id: Option<String>,
    pub metadata: Option<Metadata>,
    pub window_minutes: Option<i64>,
}

/// `notification` is null when preference or quiet-hours policy suppressed
/// creation; that is a successful outcome, not an error.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub notification: Option<Notification>,
}

pub async fn create_notification(
    State(state): State<AppState>,
    Json(request): Json<CreateNotificationRequest>,
) -> Result<Json<NotificationResponse>> {
    let notification = state
        .notifications
        .create_notification(
            &request.user_id,
            request.notification_type,
            &request.title,
            &request.message,
            request.related_listing_id,
            request.metadata,
        )
        .await?;

    Ok(Json(NotificationResponse { notification }))
}

pub async fn message_notification(
    State(state): State<AppState>,
    Json(request): Json<MessageNotificationRequest>,
) -> Result<Json<NotificationResponse>> {
    let notification = state
        .notifications
        .update_or_create_message_notification(
            &request.user_id,
            &request.conversation_id,
            &request.sender_name,
            request.related_listing_id,
            request.metadata,
        )
        .await?;

    Ok(Json(NotificationResponse { notification }))
}

pub async fn group_notification(
    State(state): State<AppState>,
    Json(request): Json<GroupNotificationRequest>,
) -> Result<Json<NotificationResponse>> {
    let notification = state
        .notifications
        .group_or_create_notification(
            &request.user_id,
            request.notification_type,
            &request.title,
            &request.message,
            request.related_listing_id,
            request.metadata,
            request.window_minutes,
        )
        .await?;

    Ok(Json(NotificationResponse { notification }))
}

// ============================================================================
// Read API
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub user_id: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsResponse {
    pub notifications: Vec<Notification>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub has_more: bool,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListNotificationsResponse>> {
    let cursor = params.cursor.as_deref().and_then(|raw| {
        let decoded = Cursor::decode(raw);
        if decoded.is_none() {
            // Fall back to offset pagination on malformed cursors
            tracing::warn!(cursor = %raw, "Invalid cursor format");
        }
        decoded
    });

    let query = ListQuery {
        page: params.page.max(1),
        limit: params.limit.clamp(1, 100),
        unread_only: params.unread_only,
        type_filter: params.notification_type,
        start_date: params.start_date,
        end_date: params.end_date,
        cursor,
    };

    let page = state
        .notifications
        .list_notifications(&params.user_id, &query)
        .await?;

    Ok(Json(ListNotificationsResponse {
        notifications: page.notifications,
        pagination: PaginationInfo {
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
            cursor: page.next_cursor,
            has_more: page.has_more,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub count: u64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<UnreadCountResponse>> {
    let count = state
        .notifications
        .get_unread_count(&params.user_id)
        .await?;
    Ok(Json(UnreadCountResponse { count }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResponse {
    pub affected: u64,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserParams>,
) -> Result<Json<AffectedResponse>> {
    state.notifications.mark_as_read(id, &params.user_id).await?;
    Ok(Json(AffectedResponse { affected: 1 }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<AffectedResponse>> {
    let affected = state.notifications.mark_all_as_read(&params.user_id).await?;
    Ok(Json(AffectedResponse { affected }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserParams>,
) -> Result<Json<AffectedResponse>> {
    state
        .notifications
        .delete_notification(id, &params.user_id)
        .await?;
    Ok(Json(AffectedResponse { affected: 1 }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub days_old: Option<i64>,
}

pub async fn archive_notifications(
    State(state): State<AppState>,
    Json(request): Json<ArchiveRequest>,
) -> Result<Json<AffectedResponse>> {
    let affected = state
        .notifications
        .archive_old_notifications(request.days_old.unwrap_or(90))
        .await?;
    Ok(Json(AffectedResponse { affected }))
}

/// Per-channel attempt history for one notification, newest first.
pub async fn delivery_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<crate::delivery::DeliveryLogEntry>>> {
    let entries = state.delivery_log.find_for_notification(id).await?;
    Ok(Json(entries))
}

// ============================================================================
// Preferences
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesRequest {
    pub user_id: String,
    pub preferences: Option<HashMap<NotificationType, ChannelOverride>>,
    #[serde(default, deserialize_with = "double_option")]
    pub quiet_hours: Option<Option<QuietHours>>,
}

pub async fn get_preferences(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<PreferenceRecord>> {
    let record = state.preferences.get_preferences(&params.user_id).await?;
    Ok(Json(record))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<Json<PreferenceRecord>> {
    let record = state
        .preferences
        .update_preferences(&request.user_id, request.preferences, request.quiet_hours)
        .await?;
    Ok(Json(record))
}

// ============================================================================
// Observability
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsParams {
    pub window_hours: Option<i64>,
}

pub async fn metrics_summary(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<crate::delivery::MetricsSummary>> {
    let summary = state
        .metrics
        .summary(params.window_hours.unwrap_or(24))
        .await?;
    Ok(Json(summary))
}

pub async fn prometheus_metrics() -> Result<String> {
    crate::metrics::encode_metrics()
        .map_err(|e| crate::error::AppError::Internal(format!("failed to encode metrics: {e}")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub delivery: crate::delivery::HealthReport,
    pub retry_queue: RetryQueueHealth,
    pub realtime_sessions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueHealth {
    pub queue_size: usize,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let delivery = state.metrics.check_health().await?;
    let status = if delivery.healthy {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        delivery,
        retry_queue: RetryQueueHealth {
            queue_size: state.retry_queue.len(),
        },
        realtime_sessions: state.transport.session_count(),
    }))
}
