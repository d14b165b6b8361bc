use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of marketplace notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    ListingApproved,
    ListingRejected,
    NewMessage,
    ListingSold,
    NewInquiry,
    CommentReported,
    RoleAssigned,
    System,
}

impl NotificationType {
    pub const ALL: [NotificationType; 8] = [
        NotificationType::ListingApproved,
        NotificationType::ListingRejected,
        NotificationType::NewMessage,
        NotificationType::ListingSold,
        NotificationType::NewInquiry,
        NotificationType::CommentReported,
        NotificationType::RoleAssigned,
        NotificationType::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ListingApproved => "listing-approved",
            NotificationType::ListingRejected => "listing-rejected",
            NotificationType::NewMessage => "new-message",
            NotificationType::ListingSold => "listing-sold",
            NotificationType::NewInquiry => "new-inquiry",
            NotificationType::CommentReported => "comment-reported",
            NotificationType::RoleAssigned => "role-assigned",
            NotificationType::System => "system",
        }
    }

    /// Types that collapse into a single unread notification within a
    /// grouping window.
    pub fn is_groupable(&self) -> bool {
        matches!(
            self,
            NotificationType::NewInquiry | NotificationType::System
        )
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listing-approved" => Ok(NotificationType::ListingApproved),
            "listing-rejected" => Ok(NotificationType::ListingRejected),
            "new-message" => Ok(NotificationType::NewMessage),
            "listing-sold" => Ok(NotificationType::ListingSold),
            "new-inquiry" => Ok(NotificationType::NewInquiry),
            "comment-reported" => Ok(NotificationType::CommentReported),
            "role-assigned" => Ok(NotificationType::RoleAssigned),
            "system" => Ok(NotificationType::System),
            other => Err(format!("unknown notification type: {other}")),
        }
    }
}

/// Open key/value bag attached to a notification.
///
/// Kept as an opaque JSON map rather than a typed union; the documented keys
/// (`messageCount`, `count`, `conversationId`) are parsed defensively through
/// the accessors below, so a collaborator writing a string where a number is
/// expected degrades to the default instead of failing the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub serde_json::Map<String, Value>);

impl Metadata {
    pub const MESSAGE_COUNT: &'static str = "messageCount";
    pub const COUNT: &'static str = "count";
    pub const CONVERSATION_ID: &'static str = "conversationId";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn u64_key(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn message_count(&self) -> Option<u64> {
        self.u64_key(Self::MESSAGE_COUNT)
    }

    pub fn set_message_count(&mut self, count: u64) {
        self.0
            .insert(Self::MESSAGE_COUNT.to_string(), Value::from(count));
    }

    pub fn count(&self) -> Option<u64> {
        self.u64_key(Self::COUNT)
    }

    pub fn set_count(&mut self, count: u64) {
        self.0.insert(Self::COUNT.to_string(), Value::from(count));
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.0.get(Self::CONVERSATION_ID).and_then(Value::as_str)
    }

    pub fn set_conversation_id(&mut self, conversation_id: &str) {
        self.0.insert(
            Self::CONVERSATION_ID.to_string(),
            Value::from(conversation_id),
        );
    }

    /// Merge another bag into this one; keys in `other` win.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

impl From<serde_json::Map<String, Value>> for Metadata {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A user-facing notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_listing_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Stable thread identity, set to the notification's own id the first
    /// time it becomes part of a group and never changed afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Millisecond-precision timestamp. Pagination cursors carry unix millis, so
/// sub-millisecond creation times would make the cursor comparison lossy.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        related_listing_id: Option<String>,
        metadata: Option<Metadata>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            notification_type,
            title: title.into(),
            message: message.into(),
            is_read: false,
            related_listing_id,
            metadata,
            group_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this notification as the root of its own group, if not grouped yet.
    pub fn ensure_group_id(&mut self) {
        if self.group_id.is_none() {
            self.group_id = Some(self.id);
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        self.metadata.get_or_insert_with(Metadata::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_round_trip() {
        for ty in NotificationType::ALL {
            assert_eq!(ty.as_str().parse::<NotificationType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_type_serde_kebab_case() {
        let encoded = serde_json::to_string(&NotificationType::ListingApproved).unwrap();
        assert_eq!(encoded, "\"listing-approved\"");

        let decoded: NotificationType = serde_json::from_str("\"new-message\"").unwrap();
        assert_eq!(decoded, NotificationType::NewMessage);
    }

    #[test]
    fn test_groupable_types() {
        assert!(NotificationType::NewInquiry.is_groupable());
        assert!(NotificationType::System.is_groupable());
        assert!(!NotificationType::NewMessage.is_groupable());
        assert!(!NotificationType::RoleAssigned.is_groupable());
    }

    #[test]
    fn test_metadata_defensive_parse() {
        let mut map = serde_json::Map::new();
        map.insert("messageCount".to_string(), json!("7"));
        map.insert("count".to_string(), json!({"nested": true}));
        map.insert("conversationId".to_string(), json!("conv-1"));
        let metadata = Metadata(map);

        // String numbers parse, malformed values degrade to None
        assert_eq!(metadata.message_count(), Some(7));
        assert_eq!(metadata.count(), None);
        assert_eq!(metadata.conversation_id(), Some("conv-1"));
    }

    #[test]
    fn test_ensure_group_id_is_stable() {
        let mut notification = Notification::new(
            "user-1",
            NotificationType::NewMessage,
            "New Message",
            "New message from Alice",
            None,
            None,
        );
        assert!(notification.group_id.is_none());

        notification.ensure_group_id();
        let group_id = notification.group_id.unwrap();
        assert_eq!(group_id, notification.id);

        // Grouping again never reassigns the thread identity
        notification.ensure_group_id();
        assert_eq!(notification.group_id.unwrap(), group_id);
    }
}
