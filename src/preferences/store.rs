//! Preference record storage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::notification::NotificationType;

use super::types::{ChannelPreferences, PreferenceRecord, QuietHours};

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<PreferenceRecord>, StoreError>;

    /// Insert the record unless one already exists for the user; the unique
    /// constraint on `user_id` makes lazy creation idempotent under races.
    /// Returns the record actually stored.
    async fn insert_if_absent(
        &self,
        record: &PreferenceRecord,
    ) -> Result<PreferenceRecord, StoreError>;

    async fn save(&self, record: &PreferenceRecord) -> Result<(), StoreError>;
}

/// In-memory preference store.
pub struct MemoryPreferenceStore {
    rows: DashMap<String, PreferenceRecord>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }
}

impl Default for MemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn find(&self, user_id: &str) -> Result<Option<PreferenceRecord>, StoreError> {
        Ok(self.rows.get(user_id).map(|r| r.value().clone()))
    }

    async fn insert_if_absent(
        &self,
        record: &PreferenceRecord,
    ) -> Result<PreferenceRecord, StoreError> {
        let entry = self
            .rows
            .entry(record.user_id.clone())
            .or_insert_with(|| record.clone());
        Ok(entry.value().clone())
    }

    async fn save(&self, record: &PreferenceRecord) -> Result<(), StoreError> {
        self.rows.insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}

/// PostgreSQL preference store. The channel matrix and quiet hours are JSONB
/// columns; `user_id` is the primary key.
pub struct PostgresPreferenceStore {
    pool: PgPool,
}

impl PostgresPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    user_id: String,
    preferences: sqlx::types::Json<HashMap<NotificationType, ChannelPreferences>>,
    quiet_hours: Option<sqlx::types::Json<QuietHours>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PreferenceRow> for PreferenceRecord {
    fn from(row: PreferenceRow) -> Self {
        Self {
            user_id: row.user_id,
            preferences: row.preferences.0,
            quiet_hours: row.quiet_hours.map(|q| q.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl PreferenceStore for PostgresPreferenceStore {
    async fn find(&self, user_id: &str) -> Result<Option<PreferenceRecord>, StoreError> {
        let row: Option<PreferenceRow> = sqlx::query_as(
            "SELECT user_id, preferences, quiet_hours, created_at, updated_at \
             FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PreferenceRecord::from))
    }

    async fn insert_if_absent(
        &self,
        record: &PreferenceRecord,
    ) -> Result<PreferenceRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences
                (user_id, preferences, quiet_hours, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&record.user_id)
        .bind(sqlx::types::Json(&record.preferences))
        .bind(record.quiet_hours.as_ref().map(sqlx::types::Json))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        // Re-read so a concurrent winner's record is returned, not ours
        self.find(&record.user_id)
            .await?
            .ok_or_else(|| StoreError::Backend("preference row vanished after insert".to_string()))
    }

    async fn save(&self, record: &PreferenceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences
                (user_id, preferences, quiet_hours, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET preferences = EXCLUDED.preferences,
                quiet_hours = EXCLUDED.quiet_hours,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.user_id)
        .bind(sqlx::types::Json(&record.preferences))
        .bind(record.quiet_hours.as_ref().map(sqlx::types::Json))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
