//! Preference resolution and mutation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, Timelike, Utc};

use crate::delivery::ChannelKind;
use crate::error::{AppError, Result};
use crate::notification::NotificationType;

use super::store::PreferenceStore;
use super::types::{
    default_for, in_quiet_window, parse_hhmm, ChannelOverride, PreferenceRecord, QuietHours,
};

pub struct PreferenceService {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceService {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Fetch a user's preferences, lazily creating the default record.
    pub async fn get_preferences(&self, user_id: &str) -> Result<PreferenceRecord> {
        if let Some(record) = self.store.find(user_id).await? {
            return Ok(record);
        }

        let record = self
            .store
            .insert_if_absent(&PreferenceRecord::with_defaults(user_id))
            .await?;
        tracing::info!(user_id = %user_id, "Created default notification preferences");
        Ok(record)
    }

    /// Merge per-type channel overrides and/or replace the quiet-hours window.
    ///
    /// `quiet_hours` uses double-option semantics: `None` leaves the window
    /// untouched, `Some(None)` clears it, `Some(Some(_))` replaces it.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        per_type: Option<HashMap<NotificationType, ChannelOverride>>,
        quiet_hours: Option<Option<QuietHours>>,
    ) -> Result<PreferenceRecord> {
        let mut record = self.get_preferences(user_id).await?;

        if let Some(overrides) = per_type {
            for (notification_type, channels) in overrides {
                let entry = record
                    .preferences
                    .entry(notification_type)
                    .or_insert_with(|| default_for(notification_type));
                channels.apply(entry);
            }
        }

        if let Some(window) = quiet_hours {
            record.quiet_hours = window;
        }

        if let Some(window) = record.quiet_hours.as_ref().filter(|w| w.enabled) {
            validate_quiet_hours(window)?;
        }

        record.updated_at = Utc::now();
        self.store.save(&record).await?;
        tracing::info!(user_id = %user_id, "Updated notification preferences");

        Ok(record)
    }

    /// Whether `notification_type` may be delivered over `channel` for this
    /// user. Unknown types are disabled; `role-assigned` inherits the
    /// `system` row unless explicitly configured.
    pub async fn is_enabled(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: ChannelKind,
    ) -> Result<bool> {
        let record = self.get_preferences(user_id).await?;
        Ok(record.effective(notification_type).channel(channel))
    }

    /// Whether the user's quiet-hours window covers the current local
    /// time of day. Uses a naive hour/minute comparison against the server
    /// clock; the stored timezone is not consulted for DST.
    pub async fn is_quiet_hours(&self, user_id: &str) -> Result<bool> {
        let record = self.get_preferences(user_id).await?;

        let Some(window) = record.quiet_hours.as_ref().filter(|w| w.enabled) else {
            return Ok(false);
        };

        let (Some(start), Some(end)) = (parse_hhmm(&window.start), parse_hhmm(&window.end)) else {
            // A malformed stored window never blocks notifications
            tracing::warn!(user_id = %user_id, "Ignoring malformed quiet-hours window");
            return Ok(false);
        };

        let now = Local::now().time();
        let now_minutes = now.hour() * 60 + now.minute();
        Ok(in_quiet_window(now_minutes, start, end))
    }
}

fn validate_quiet_hours(window: &QuietHours) -> Result<()> {
    if parse_hhmm(&window.start).is_none() {
        return Err(AppError::Validation(format!(
            "Invalid quiet hours start time format: {}. Expected HH:mm format.",
            window.start
        )));
    }
    if parse_hhmm(&window.end).is_none() {
        return Err(AppError::Validation(format!(
            "Invalid quiet hours end time format: {}. Expected HH:mm format.",
            window.end
        )));
    }
    if window.timezone.as_deref().unwrap_or("").is_empty() {
        return Err(AppError::Validation(
            "Timezone is required when quiet hours are enabled.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::store::MemoryPreferenceStore;

    fn service() -> PreferenceService {
        PreferenceService::new(Arc::new(MemoryPreferenceStore::new()))
    }

    fn quiet(enabled: bool, start: &str, end: &str, tz: Option<&str>) -> QuietHours {
        QuietHours {
            enabled,
            start: start.to_string(),
            end: end.to_string(),
            timezone: tz.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_get_preferences_creates_defaults_once() {
        let service = service();

        let first = service.get_preferences("user-1").await.unwrap();
        let second = service.get_preferences("user-1").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.preferences.len(), 7);
    }

    #[tokio::test]
    async fn test_default_enablement() {
        let service = service();

        assert!(service
            .is_enabled("user-1", NotificationType::NewMessage, ChannelKind::InApp)
            .await
            .unwrap());
        assert!(!service
            .is_enabled("user-1", NotificationType::NewMessage, ChannelKind::Email)
            .await
            .unwrap());
        assert!(service
            .is_enabled("user-1", NotificationType::NewMessage, ChannelKind::Push)
            .await
            .unwrap());
        // role-assigned rides on the system defaults
        assert!(service
            .is_enabled("user-1", NotificationType::RoleAssigned, ChannelKind::InApp)
            .await
            .unwrap());
        assert!(!service
            .is_enabled("user-1", NotificationType::RoleAssigned, ChannelKind::Email)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_partial_update_only_touches_provided_channels() {
        let service = service();

        let overrides = HashMap::from([(
            NotificationType::NewMessage,
            ChannelOverride {
                push: Some(false),
                ..Default::default()
            },
        )]);
        let record = service
            .update_preferences("user-1", Some(overrides), None)
            .await
            .unwrap();

        let prefs = record.preferences[&NotificationType::NewMessage];
        assert!(prefs.in_app);
        assert!(!prefs.email);
        assert!(!prefs.push);
    }

    #[tokio::test]
    async fn test_explicit_role_assigned_override() {
        let service = service();

        let overrides = HashMap::from([(
            NotificationType::RoleAssigned,
            ChannelOverride {
                in_app: Some(false),
                ..Default::default()
            },
        )]);
        service
            .update_preferences("user-1", Some(overrides), None)
            .await
            .unwrap();

        assert!(!service
            .is_enabled("user-1", NotificationType::RoleAssigned, ChannelKind::InApp)
            .await
            .unwrap());
        // The system row itself is untouched
        assert!(service
            .is_enabled("user-1", NotificationType::System, ChannelKind::InApp)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_quiet_hours_validation() {
        let service = service();

        let bad_start = service
            .update_preferences(
                "user-1",
                None,
                Some(Some(quiet(true, "25:00", "08:00", Some("UTC")))),
            )
            .await;
        assert!(matches!(bad_start, Err(AppError::Validation(_))));

        let missing_tz = service
            .update_preferences(
                "user-1",
                None,
                Some(Some(quiet(true, "22:00", "08:00", None))),
            )
            .await;
        assert!(matches!(missing_tz, Err(AppError::Validation(_))));

        // Disabled windows are stored without validation
        let disabled = service
            .update_preferences(
                "user-1",
                None,
                Some(Some(quiet(false, "oops", "08:00", None))),
            )
            .await;
        assert!(disabled.is_ok());
    }

    #[tokio::test]
    async fn test_quiet_hours_cleared_with_explicit_null() {
        let service = service();

        service
            .update_preferences(
                "user-1",
                None,
                Some(Some(quiet(true, "22:00", "08:00", Some("UTC")))),
            )
            .await
            .unwrap();

        let record = service
            .update_preferences("user-1", None, Some(None))
            .await
            .unwrap();
        assert!(record.quiet_hours.is_none());
        assert!(!service.is_quiet_hours("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_all_day_window_is_always_quiet() {
        let service = service();

        service
            .update_preferences(
                "user-1",
                None,
                Some(Some(quiet(true, "00:00", "23:59", Some("UTC")))),
            )
            .await
            .unwrap();

        // Only 23:59:00-23:59:59 falls outside this window; accept either
        // outcome at that boundary by checking the pure predicate instead.
        let now = Local::now().time();
        let now_minutes = now.hour() * 60 + now.minute();
        let expected = in_quiet_window(now_minutes, 0, 23 * 60 + 59);
        assert_eq!(service.is_quiet_hours("user-1").await.unwrap(), expected);
    }
}
