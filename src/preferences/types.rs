use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::ChannelKind;
use crate::notification::NotificationType;

/// Per-channel enablement for one notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPreferences {
    pub in_app: bool,
    pub email: bool,
    pub push: bool,
}

impl ChannelPreferences {
    pub fn channel(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::InApp => self.in_app,
            ChannelKind::Email => self.email,
            ChannelKind::Push => self.push,
        }
    }
}

/// Partial channel override supplied by preference updates; only provided
/// channels are overwritten.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOverride {
    pub in_app: Option<bool>,
    pub email: Option<bool>,
    pub push: Option<bool>,
}

impl ChannelOverride {
    pub fn apply(&self, prefs: &mut ChannelPreferences) {
        if let Some(in_app) = self.in_app {
            prefs.in_app = in_app;
        }
        if let Some(email) = self.email {
            prefs.email = email;
        }
        if let Some(push) = self.push {
            prefs.push = push;
        }
    }
}

/// A do-not-disturb window on the user's local time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    /// "HH:mm"
    pub start: String,
    /// "HH:mm"; `end < start` wraps past midnight
    pub end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// One preference record per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub user_id: String,
    pub preferences: HashMap<NotificationType, ChannelPreferences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceRecord {
    /// Fresh record carrying the default matrix.
    pub fn with_defaults(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            preferences: default_matrix(),
            quiet_hours: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective channel matrix for a type: explicit entry, or the
    /// `system` row for `role-assigned`, or everything disabled.
    pub fn effective(&self, notification_type: NotificationType) -> ChannelPreferences {
        if let Some(prefs) = self.preferences.get(&notification_type) {
            return *prefs;
        }
        if notification_type == NotificationType::RoleAssigned {
            if let Some(prefs) = self.preferences.get(&NotificationType::System) {
                return *prefs;
            }
        }
        ChannelPreferences {
            in_app: false,
            email: false,
            push: false,
        }
    }
}

/// Hard-coded defaults applied on first read of a user's preferences.
pub fn default_matrix() -> HashMap<NotificationType, ChannelPreferences> {
    fn prefs(in_app: bool, email: bool, push: bool) -> ChannelPreferences {
        ChannelPreferences {
            in_app,
            email,
            push,
        }
    }

    HashMap::from([
        (NotificationType::ListingApproved, prefs(true, true, false)),
        (NotificationType::ListingRejected, prefs(true, true, false)),
        (NotificationType::NewMessage, prefs(true, false, true)),
        (NotificationType::ListingSold, prefs(true, true, false)),
        (NotificationType::NewInquiry, prefs(true, false, true)),
        (NotificationType::CommentReported, prefs(true, false, false)),
        (NotificationType::System, prefs(true, false, false)),
    ])
}

/// Default channel matrix for one type, used when an update targets a type
/// that has no explicit entry yet.
pub fn default_for(notification_type: NotificationType) -> ChannelPreferences {
    let matrix = default_matrix();
    if let Some(prefs) = matrix.get(&notification_type) {
        return *prefs;
    }
    // role-assigned inherits the system row
    matrix[&NotificationType::System]
}

/// Parse "HH:mm" (00-23 / 00-59) into minutes since midnight.
pub fn parse_hhmm(raw: &str) -> Option<u32> {
    let bytes = raw.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        if !bytes[range.clone()].iter().all(u8::is_ascii_digit) {
            return None;
        }
        raw[range].parse().ok()
    };
    let hours = digits(0..2)?;
    let minutes = digits(3..5)?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Time-of-day window check. Windows where `end < start` wrap past midnight.
pub fn in_quiet_window(now_minutes: u32, start_minutes: u32, end_minutes: u32) -> bool {
    if start_minutes <= end_minutes {
        now_minutes >= start_minutes && now_minutes < end_minutes
    } else {
        now_minutes >= start_minutes || now_minutes < end_minutes
    }
}
