//! Append-only audit of delivery attempts.
//!
//! One row per (notification, channel) attempt; a retry appends a new row
//! rather than mutating the old one. The orchestrator updates a row only
//! within a single attempt (pending → sent/failed).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

use super::channel::ChannelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Delivered)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: ChannelKind,
    pub status: DeliveryStatus,
    pub attempted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

impl DeliveryLogEntry {
    /// A fresh attempt in the pending state.
    pub fn pending(notification_id: Uuid, channel: ChannelKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            channel,
            status: DeliveryStatus::Pending,
            attempted_at: Utc::now(),
            delivered_at: None,
            error: None,
            retry_count: 0,
        }
    }

    /// A single-row outcome written at attempt time (retry engine path).
    pub fn outcome(
        notification_id: Uuid,
        channel: ChannelKind,
        status: DeliveryStatus,
        retry_count: u32,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            channel,
            status,
            attempted_at: Utc::now(),
            delivered_at: status.is_success().then(Utc::now),
            error,
            retry_count,
        }
    }

    pub fn mark_sent(&mut self) {
        self.status = DeliveryStatus::Sent;
        self.delivered_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeliveryStatus::Failed;
        self.error = Some(error.into());
    }
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn insert(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError>;

    /// Rewrite an attempt row in place (pending → sent/failed).
    async fn update(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError>;

    /// Attempts for one notification, newest first.
    async fn find_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError>;

    /// All attempts made after `since`, newest first.
    async fn find_since(&self, since: DateTime<Utc>)
        -> Result<Vec<DeliveryLogEntry>, StoreError>;
}

/// In-memory delivery log.
pub struct MemoryDeliveryLogStore {
    rows: DashMap<Uuid, DeliveryLogEntry>,
}

impl MemoryDeliveryLogStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for MemoryDeliveryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_newest_first(rows: &mut [DeliveryLogEntry]) {
    rows.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
}

#[async_trait]
impl DeliveryLogStore for MemoryDeliveryLogStore {
    async fn insert(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        self.rows.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        self.rows.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let mut rows: Vec<DeliveryLogEntry> = self
            .rows
            .iter()
            .filter(|e| e.notification_id == notification_id)
            .map(|e| e.value().clone())
            .collect();
        sort_newest_first(&mut rows);
        Ok(rows)
    }

    async fn find_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let mut rows: Vec<DeliveryLogEntry> = self
            .rows
            .iter()
            .filter(|e| e.attempted_at > since)
            .map(|e| e.value().clone())
            .collect();
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

/// PostgreSQL delivery log over the `notification_delivery_logs` table.
pub struct PostgresDeliveryLogStore {
    pool: PgPool,
}

impl PostgresDeliveryLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryLogRow {
    id: Uuid,
    notification_id: Uuid,
    channel: String,
    status: String,
    attempted_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: i32,
}

impl TryFrom<DeliveryLogRow> for DeliveryLogEntry {
    type Error = StoreError;

    fn try_from(row: DeliveryLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            notification_id: row.notification_id,
            channel: row.channel.parse().map_err(StoreError::Backend)?,
            status: row.status.parse().map_err(StoreError::Backend)?,
            attempted_at: row.attempted_at,
            delivered_at: row.delivered_at,
            error: row.error,
            retry_count: row.retry_count.max(0) as u32,
        })
    }
}

#[async_trait]
impl DeliveryLogStore for PostgresDeliveryLogStore {
    async fn insert(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_delivery_logs
                (id, notification_id, channel, status, attempted_at,
                 delivered_at, error, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.notification_id)
        .bind(entry.channel.as_str())
        .bind(entry.status.as_str())
        .bind(entry.attempted_at)
        .bind(entry.delivered_at)
        .bind(&entry.error)
        .bind(entry.retry_count as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE notification_delivery_logs
            SET status = $2, delivered_at = $3, error = $4, retry_count = $5
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(entry.status.as_str())
        .bind(entry.delivered_at)
        .bind(&entry.error)
        .bind(entry.retry_count as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let rows: Vec<DeliveryLogRow> = sqlx::query_as(
            "SELECT id, notification_id, channel, status, attempted_at, delivered_at, \
             error, retry_count \
             FROM notification_delivery_logs \
             WHERE notification_id = $1 ORDER BY attempted_at DESC",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryLogEntry::try_from).collect()
    }

    async fn find_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let rows: Vec<DeliveryLogRow> = sqlx::query_as(
            "SELECT id, notification_id, channel, status, attempted_at, delivered_at, \
             error, retry_count \
             FROM notification_delivery_logs \
             WHERE attempted_at > $1 ORDER BY attempted_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryLogEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_retry_appends_rather_than_mutates() {
        let store = MemoryDeliveryLogStore::new();
        let notification_id = Uuid::new_v4();

        for attempt in 0..3u32 {
            let entry = DeliveryLogEntry::outcome(
                notification_id,
                ChannelKind::InApp,
                DeliveryStatus::Failed,
                attempt,
                Some("transport offline".to_string()),
            );
            store.insert(&entry).await.unwrap();
        }

        let rows = store.find_for_notification(notification_id).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_attempt_transition_updates_in_place() {
        let store = MemoryDeliveryLogStore::new();
        let mut entry = DeliveryLogEntry::pending(Uuid::new_v4(), ChannelKind::Email);
        store.insert(&entry).await.unwrap();

        entry.mark_sent();
        store.update(&entry).await.unwrap();

        let rows = store
            .find_for_notification(entry.notification_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DeliveryStatus::Sent);
        assert!(rows[0].delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_find_since_filters_window() {
        let store = MemoryDeliveryLogStore::new();

        let mut recent = DeliveryLogEntry::pending(Uuid::new_v4(), ChannelKind::Push);
        recent.attempted_at = Utc::now() - Duration::minutes(5);
        store.insert(&recent).await.unwrap();

        let mut old = DeliveryLogEntry::pending(Uuid::new_v4(), ChannelKind::Push);
        old.attempted_at = Utc::now() - Duration::hours(30);
        store.insert(&old).await.unwrap();

        let rows = store
            .find_since(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, recent.id);
    }
}
