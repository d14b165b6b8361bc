//! Delivery channel abstraction.
//!
//! Email and web push are interchangeable behind this trait; the orchestrator
//! iterates a registry of channels, so adding another transport (SMS, webhook)
//! never touches orchestration logic.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::ContactRecord;
use crate::notification::Notification;

/// The three delivery channels a notification can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    InApp,
    Email,
    Push,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::InApp => "in_app",
            ChannelKind::Email => "email",
            ChannelKind::Push => "push",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_app" => Ok(ChannelKind::InApp),
            "email" => Ok(ChannelKind::Email),
            "push" => Ok(ChannelKind::Push),
            other => Err(format!("unknown delivery channel: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("send timed out after {0}s")]
    Timeout(u64),
}

/// A stateless sender for one delivery channel.
///
/// `send` returning `Ok(false)` and `Err(_)` are both non-fatal to the
/// caller: the orchestrator records a failed delivery-log row and moves on.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the channel is configured well enough to attempt a send.
    /// Checked by the orchestrator before every attempt.
    fn is_available(&self) -> bool;

    async fn send(
        &self,
        contact: &ContactRecord,
        notification: &Notification,
    ) -> Result<bool, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_round_trip() {
        for kind in [ChannelKind::InApp, ChannelKind::Email, ChannelKind::Push] {
            assert_eq!(kind.as_str().parse::<ChannelKind>().unwrap(), kind);
        }
        assert!("sms".parse::<ChannelKind>().is_err());
    }
}
