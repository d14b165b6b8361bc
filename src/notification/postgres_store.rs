//! PostgreSQL notification store.
//!
//! Durable backend over the `notifications` table. Listing is assembled with
//! `QueryBuilder` because the filter set (unread/type/date range/cursor) is
//! combinatorial; ordering is always `created_at DESC, id DESC` so cursor
//! pagination stays stable under concurrent inserts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::StoreError;

use super::store::{Cursor, ListQuery, NotificationPage, NotificationStore};
use super::types::{Metadata, Notification, NotificationType};

const SELECT_COLUMNS: &str = "id, user_id, type, title, message, is_read, \
     related_listing_id, metadata, group_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    #[sqlx(rename = "type")]
    notification_type: String,
    title: String,
    message: String,
    is_read: bool,
    related_listing_id: Option<String>,
    metadata: Option<sqlx::types::Json<Metadata>>,
    group_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let notification_type = row
            .notification_type
            .parse::<NotificationType>()
            .map_err(StoreError::Backend)?;

        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            notification_type,
            title: row.title,
            message: row.message,
            is_read: row.is_read,
            related_listing_id: row.related_listing_id,
            metadata: row.metadata.map(|m| m.0),
            group_id: row.group_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ListQuery) {
        if query.unread_only {
            qb.push(" AND is_read = FALSE");
        }
        if let Some(ty) = query.type_filter {
            qb.push(" AND type = ").push_bind(ty.as_str());
        }
        if let Some(start) = query.start_date {
            qb.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = query.end_date {
            qb.push(" AND created_at <= ").push_bind(end);
        }
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, type, title, message, is_read, related_listing_id,
                 metadata, group_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.user_id)
        .bind(notification.notification_type.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(&notification.related_listing_id)
        .bind(notification.metadata.clone().map(sqlx::types::Json))
        .bind(notification.group_id)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET title = $2, message = $3, is_read = $4, metadata = $5,
                group_id = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(notification.id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.metadata.clone().map(sqlx::types::Json))
        .bind(notification.group_id)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_for_user(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> Result<Option<Notification>, StoreError> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM notifications WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn find_unread_message_for_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, StoreError> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM notifications
            WHERE user_id = $1
              AND type = $2
              AND is_read = FALSE
              AND metadata->>'conversationId' = $3
              AND created_at > $4
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(NotificationType::NewMessage.as_str())
        .bind(conversation_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn find_unread_of_type(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, StoreError> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM notifications
            WHERE user_id = $1
              AND type = $2
              AND is_read = FALSE
              AND created_at > $3
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(notification_type.as_str())
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn list(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<NotificationPage, StoreError> {
        let limit = i64::from(query.limit);

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {SELECT_COLUMNS} FROM notifications WHERE user_id = "
        ));
        qb.push_bind(user_id);
        Self::push_filters(&mut qb, query);

        if let Some(cursor) = query.cursor {
            qb.push(" AND (created_at < ")
                .push_bind(cursor.created_at)
                .push(" OR (created_at = ")
                .push_bind(cursor.created_at)
                .push(" AND id < ")
                .push_bind(cursor.id)
                .push("))");
        }

        qb.push(" ORDER BY created_at DESC, id DESC");

        if query.cursor.is_some() {
            // Fetch one extra row to detect whether more pages exist
            qb.push(" LIMIT ").push_bind(limit + 1);
        } else {
            let skip = i64::from(query.page.max(1) - 1) * limit;
            qb.push(" LIMIT ").push_bind(limit);
            qb.push(" OFFSET ").push_bind(skip);
        }

        let rows: Vec<NotificationRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let mut notifications = rows
            .into_iter()
            .map(Notification::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        if query.cursor.is_some() {
            let has_more = notifications.len() > limit as usize;
            notifications.truncate(limit as usize);
            let next_cursor = if has_more {
                notifications.last().map(|last| {
                    Cursor {
                        created_at: last.created_at,
                        id: last.id,
                    }
                    .encode()
                })
            } else {
                None
            };

            return Ok(NotificationPage {
                notifications,
                page: None,
                limit: query.limit,
                total: None,
                total_pages: None,
                next_cursor,
                has_more,
            });
        }

        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM notifications WHERE user_id = ");
        count_qb.push_bind(user_id);
        Self::push_filters(&mut count_qb, query);

        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let total = total as u64;
        let total_pages = total.div_ceil(query.limit.max(1) as u64);

        Ok(NotificationPage {
            notifications,
            page: Some(query.page),
            limit: query.limit,
            total: Some(total),
            total_pages: Some(total_pages),
            next_cursor: None,
            has_more: (query.page.max(1) as u64) < total_pages,
        })
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, updated_at = NOW() \
             WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM notifications WHERE is_read = TRUE AND created_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE created_at > $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn count_all_unread(&self) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE is_read = FALSE")
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn counts_by_type_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<NotificationType, u64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT type, COUNT(*) FROM notifications WHERE created_at > $1 GROUP BY type",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (raw_type, count) in rows {
            match raw_type.parse::<NotificationType>() {
                Ok(ty) => {
                    counts.insert(ty, count as u64);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unknown type in metrics rollup"),
            }
        }
        Ok(counts)
    }
}
