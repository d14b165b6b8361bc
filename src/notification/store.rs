//! Notification store contract.
//!
//! Backends implement the same trait so the service stays agnostic: a
//! DashMap-backed memory store for tests and development, a PostgreSQL store
//! for production.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

use super::types::{Notification, NotificationType};

/// Opaque pagination cursor: the `(created_at, id)` of the last-seen item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    /// Encode as the wire format `"{unix_millis}_{id}"`.
    pub fn encode(&self) -> String {
        format!("{}_{}", self.created_at.timestamp_millis(), self.id)
    }

    /// Decode the wire format. Returns `None` on any malformed input; callers
    /// fall back to offset pagination rather than erroring.
    pub fn decode(raw: &str) -> Option<Self> {
        let (millis, id) = raw.split_once('_')?;
        let created_at = DateTime::from_timestamp_millis(millis.parse().ok()?)?;
        Some(Self {
            created_at,
            id: id.parse().ok()?,
        })
    }
}

/// Listing parameters. Supplying a cursor switches to cursor pagination and
/// suppresses total-count computation.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub unread_only: bool,
    pub type_filter: Option<NotificationType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub cursor: Option<Cursor>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            unread_only: false,
            type_filter: None,
            start_date: None,
            end_date: None,
            cursor: None,
        }
    }
}

/// One page of notifications, newest first.
#[derive(Debug, Clone)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    /// Offset mode only
    pub page: Option<u32>,
    pub limit: u32,
    /// Offset mode only
    pub total: Option<u64>,
    /// Offset mode only
    pub total_pages: Option<u64>,
    /// Cursor mode only
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Persist in-place mutation of an existing row (grouping updates).
    async fn update(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Fetch a notification scoped to its owner.
    async fn find_for_user(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> Result<Option<Notification>, StoreError>;

    /// Fetch by id regardless of owner (retry engine reload path).
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, StoreError>;

    /// Latest unread `new-message` notification for a conversation created
    /// strictly after `since`.
    async fn find_unread_message_for_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, StoreError>;

    /// Latest unread notification of `notification_type` created strictly
    /// after `since`.
    async fn find_unread_of_type(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, StoreError>;

    async fn list(&self, user_id: &str, query: &ListQuery)
        -> Result<NotificationPage, StoreError>;

    async fn count_unread(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Returns false when no matching row exists for this user.
    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError>;

    async fn mark_all_read(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Returns false when no matching row exists for this user.
    async fn delete(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError>;

    /// Hard-delete read notifications created before `cutoff`; returns the
    /// number of rows removed.
    async fn delete_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // Metrics queries

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count_all_unread(&self) -> Result<u64, StoreError>;

    async fn counts_by_type_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<NotificationType, u64>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = Cursor {
            created_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            id: Uuid::new_v4(),
        };

        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_decode_rejects_malformed_input() {
        assert!(Cursor::decode("not-a-cursor").is_none());
        assert!(Cursor::decode("12345").is_none());
        assert!(Cursor::decode("abc_def").is_none());
        assert!(Cursor::decode("1700000000123_not-a-uuid").is_none());
    }
}
