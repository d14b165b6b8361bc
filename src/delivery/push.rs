//! Web push delivery channel.
//!
//! Availability requires configured VAPID keys. Actual delivery additionally
//! needs a per-user device subscription; the subscription store lives in the
//! surrounding platform and is not wired into this pipeline, so `send`
//! deterministically reports failure and the attempt lands in the delivery
//! log as failed.

use async_trait::async_trait;

use crate::config::PushConfig;
use crate::identity::ContactRecord;
use crate::notification::Notification;

use super::channel::{ChannelError, ChannelKind, NotificationChannel};

pub struct PushChannel {
    config: PushConfig,
}

impl PushChannel {
    pub fn new(config: PushConfig) -> Self {
        if config.is_configured() {
            tracing::info!("Web push channel initialized (VAPID keys present)");
        } else {
            tracing::warn!("VAPID keys missing, web push notifications disabled");
        }
        Self { config }
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    fn is_available(&self) -> bool {
        self.config.is_configured()
    }

    async fn send(
        &self,
        contact: &ContactRecord,
        notification: &Notification,
    ) -> Result<bool, ChannelError> {
        tracing::debug!(
            user_id = %contact.user_id,
            notification_id = %notification.id,
            "Web push requires a client device subscription; none registered"
        );
        Ok(false)
    }
}
