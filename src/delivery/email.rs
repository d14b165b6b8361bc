//! Email delivery channel over async SMTP.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;
use crate::identity::ContactRecord;
use crate::notification::{Notification, NotificationType};

use super::channel::{ChannelError, ChannelKind, NotificationChannel};

/// Sends notification emails via SMTP. Unavailable until host and
/// credentials are configured, in which case the orchestrator skips it.
pub struct EmailChannel {
    config: SmtpConfig,
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailChannel {
    pub fn new(config: SmtpConfig) -> Self {
        let mailer = match Self::build_mailer(&config) {
            Ok(mailer) => mailer,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build SMTP transport, email disabled");
                None
            }
        };

        if mailer.is_none() {
            tracing::warn!("SMTP configuration missing, email notifications disabled");
        } else {
            tracing::info!("Email notification channel initialized");
        }

        Self { config, mailer }
    }

    fn build_mailer(
        config: &SmtpConfig,
    ) -> Result<Option<AsyncSmtpTransport<Tokio1Executor>>, lettre::transport::smtp::Error> {
        if !config.is_configured() {
            return Ok(None);
        }

        let host = config.host.as_deref().unwrap_or_default();
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.port);

        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Some(builder.build()))
    }

    fn subject(&self, notification: &Notification) -> String {
        match notification.notification_type {
            NotificationType::ListingApproved => "Your listing has been approved".to_string(),
            NotificationType::ListingRejected => "Your listing was rejected".to_string(),
            NotificationType::NewInquiry => "New inquiry about your listing".to_string(),
            NotificationType::ListingSold => {
                "Congratulations! Your listing has been sold".to_string()
            }
            _ => notification.title.clone(),
        }
    }

    fn body(&self, notification: &Notification) -> String {
        let mut body = format!("{}\n\n{}\n", notification.title, notification.message);
        if let Some(listing_id) = &notification.related_listing_id {
            body.push_str(&format!(
                "\nView listing: {}/cars/{}\n",
                self.config.frontend_url, listing_id
            ));
        }
        body.push_str(
            "\nThis is an automated notification from CarMarket.\n\
             You can manage your notification preferences in your account settings.\n",
        );
        body
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn is_available(&self) -> bool {
        self.mailer.is_some()
    }

    async fn send(
        &self,
        contact: &ContactRecord,
        notification: &Notification,
    ) -> Result<bool, ChannelError> {
        let Some(mailer) = &self.mailer else {
            return Ok(false);
        };

        let email = Message::builder()
            .from(
                self.config
                    .from
                    .parse()
                    .map_err(|e| ChannelError::Send(format!("invalid from address: {e}")))?,
            )
            .to(contact
                .email
                .parse()
                .map_err(|e| ChannelError::Send(format!("invalid recipient address: {e}")))?)
            .subject(self.subject(notification))
            .header(ContentType::TEXT_PLAIN)
            .body(self.body(notification))
            .map_err(|e| ChannelError::Send(format!("failed to build email: {e}")))?;

        mailer
            .send(email)
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;

        tracing::info!(
            to = %contact.email,
            notification_id = %notification.id,
            "Email notification sent"
        );
        Ok(true)
    }
}
