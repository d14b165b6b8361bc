use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::server::AppState;

use super::handlers::{
    archive_notifications, create_notification, delete_notification, delivery_status,
    get_preferences, group_notification, health, list_notifications, mark_all_read, mark_read,
    message_notification, metrics_summary, prometheus_metrics, unread_count, update_preferences,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Prometheus metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Inbound triggers
                .route("/notifications", post(create_notification))
                .route("/notifications/message", post(message_notification))
                .route("/notifications/group", post(group_notification))
                // Read API
                .route("/notifications", get(list_notifications))
                .route("/notifications/unread-count", get(unread_count))
                .route("/notifications/read-all", post(mark_all_read))
                .route("/notifications/archive", post(archive_notifications))
                .route("/notifications/metrics", get(metrics_summary))
                .route("/notifications/{id}/read", post(mark_read))
                .route("/notifications/{id}/delivery-status", get(delivery_status))
                .route("/notifications/{id}", delete(delete_notification))
                // Preferences
                .route("/preferences", get(get_preferences))
                .route("/preferences", put(update_preferences)),
        )
}
