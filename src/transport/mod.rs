//! Real-time transport seam.
//!
//! The platform's websocket gateway owns connection and session management;
//! this pipeline only needs a push primitive that either delivers now or
//! fails, which is what feeds the retry engine. [`RealtimeTransport`] is that
//! seam, and [`SessionTransport`] is the in-process implementation the server
//! wires up: collaborators (or tests) register a per-user session channel and
//! pushes to users without a live session fail.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::notification::Notification;

/// Events pushed to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    /// A full notification, on creation or group update
    NewNotification { notification: Notification },
    /// A lightweight state change for a single notification
    NotificationUpdate {
        #[serde(rename = "type")]
        update_type: UpdateKind,
        notification_id: Uuid,
    },
    /// The user's current unread count
    UnreadCountUpdate { count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Read,
    Deleted,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no live session for user {0}")]
    Offline(String),

    #[error("session channel closed for user {0}")]
    ChannelClosed(String),
}

/// Push primitive consumed by the notification service and retry engine.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn push_to_user(&self, user_id: &str, event: ClientEvent) -> Result<(), TransportError>;
}

/// In-process transport backed by per-user mpsc channels.
pub struct SessionTransport {
    sessions: DashMap<String, mpsc::Sender<ClientEvent>>,
}

impl SessionTransport {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session for a user, replacing any previous one.
    /// The returned receiver is the client's event stream.
    pub fn register(&self, user_id: &str, buffer: usize) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        self.sessions.insert(user_id.to_string(), tx);
        tracing::debug!(user_id = %user_id, "Registered realtime session");
        rx
    }

    /// Drop a user's session.
    pub fn unregister(&self, user_id: &str) {
        if self.sessions.remove(user_id).is_some() {
            tracing::debug!(user_id = %user_id, "Unregistered realtime session");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeTransport for SessionTransport {
    async fn push_to_user(&self, user_id: &str, event: ClientEvent) -> Result<(), TransportError> {
        let sender = match self.sessions.get(user_id) {
            Some(entry) => entry.value().clone(),
            None => return Err(TransportError::Offline(user_id.to_string())),
        };

        sender
            .send(event)
            .await
            .map_err(|_| TransportError::ChannelClosed(user_id.to_string()))
    }
}
