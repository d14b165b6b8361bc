//! In-memory notification store backed by DashMap.
//!
//! Holds every notification in process memory; used by tests and the
//! development profile. Listing takes a snapshot, filters and sorts it, so
//! ordering matches the postgres backend exactly: `created_at DESC, id DESC`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;

use super::store::{Cursor, ListQuery, NotificationPage, NotificationStore};
use super::types::{Notification, NotificationType};

pub struct MemoryNotificationStore {
    rows: DashMap<Uuid, Notification>,
}

impl MemoryNotificationStore {
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

    fn snapshot_for_user(&self, user_id: &str) -> Vec<Notification> {
        self.rows
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Newest first, ties broken by id so cursor pagination is stable.
    fn sort_newest_first(rows: &mut [Notification]) {
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError> {
        self.rows.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn update(&self, notification: &Notification) -> Result<(), StoreError> {
        self.rows.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn find_for_user(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .rows
            .get(&id)
            .filter(|n| n.user_id == user_id)
            .map(|n| n.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.rows.get(&id).map(|n| n.value().clone()))
    }

    async fn find_unread_message_for_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, StoreError> {
        let mut candidates: Vec<Notification> = self
            .rows
            .iter()
            .filter(|n| {
                n.user_id == user_id
                    && n.notification_type == NotificationType::NewMessage
                    && !n.is_read
                    && n.created_at > since
                    && n.metadata
                        .as_ref()
                        .and_then(|m| m.conversation_id())
                        .is_some_and(|c| c == conversation_id)
            })
            .map(|n| n.value().clone())
            .collect();

        Self::sort_newest_first(&mut candidates);
        Ok(candidates.into_iter().next())
    }

    async fn find_unread_of_type(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>, StoreError> {
        let mut candidates: Vec<Notification> = self
            .rows
            .iter()
            .filter(|n| {
                n.user_id == user_id
                    && n.notification_type == notification_type
                    && !n.is_read
                    && n.created_at > since
            })
            .map(|n| n.value().clone())
            .collect();

        Self::sort_newest_first(&mut candidates);
        Ok(candidates.into_iter().next())
    }

    async fn list(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<NotificationPage, StoreError> {
        let mut rows = self.snapshot_for_user(user_id);

        rows.retain(|n| {
            (!query.unread_only || !n.is_read)
                && query
                    .type_filter
                    .is_none_or(|ty| n.notification_type == ty)
                && query.start_date.is_none_or(|start| n.created_at >= start)
                && query.end_date.is_none_or(|end| n.created_at <= end)
        });

        Self::sort_newest_first(&mut rows);

        let limit = query.limit as usize;

        if let Some(cursor) = query.cursor {
            // Strictly older than the cursor position
            rows.retain(|n| {
                n.created_at < cursor.created_at
                    || (n.created_at == cursor.created_at && n.id < cursor.id)
            });

            let has_more = rows.len() > limit;
            rows.truncate(limit);
            let next_cursor = if has_more {
                rows.last().map(|last| {
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
                notifications: rows,
                page: None,
                limit: query.limit,
                total: None,
                total_pages: None,
                next_cursor,
                has_more,
            });
        }

        let total = rows.len() as u64;
        let total_pages = total.div_ceil(query.limit.max(1) as u64);
        let skip = (query.page.max(1) as usize - 1) * limit;
        let notifications: Vec<Notification> = rows.into_iter().skip(skip).take(limit).collect();
        let has_more = (query.page.max(1) as u64) < total_pages;

        Ok(NotificationPage {
            notifications,
            page: Some(query.page),
            limit: query.limit,
            total: Some(total),
            total_pages: Some(total_pages),
            next_cursor: None,
            has_more,
        })
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut entry) if entry.user_id == user_id => {
                entry.is_read = true;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut affected = 0;
        for mut entry in self.rows.iter_mut() {
            if entry.user_id == user_id && !entry.is_read {
                entry.is_read = true;
                entry.updated_at = Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let owned = self
            .rows
            .get(&id)
            .is_some_and(|n| n.user_id == user_id);
        if owned {
            self.rows.remove(&id);
        }
        Ok(owned)
    }

    async fn delete_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.rows.len();
        self.rows
            .retain(|_, n| !(n.is_read && n.created_at < cutoff));
        Ok((before - self.rows.len()) as u64)
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|n| n.created_at > since)
            .count() as u64)
    }

    async fn count_all_unread(&self) -> Result<u64, StoreError> {
        Ok(self.rows.iter().filter(|n| !n.is_read).count() as u64)
    }

    async fn counts_by_type_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<NotificationType, u64>, StoreError> {
        let mut counts = HashMap::new();
        for entry in self.rows.iter() {
            if entry.created_at > since {
                *counts.entry(entry.notification_type).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
