use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::CounterCache;
use crate::config::Settings;
use crate::delivery::{
    DeliveryLogStore, DeliveryOrchestrator, EmailChannel, MetricsService, NotificationChannel,
    PushChannel,
};
use crate::identity::UserDirectory;
use crate::notification::{NotificationService, NotificationStore};
use crate::preferences::{PreferenceService, PreferenceStore};
use crate::retry::{RetryPolicy, RetryQueue};
use crate::transport::SessionTransport;

/// Storage backends selected by configuration (see `create_backends`).
pub struct Backends {
    pub notifications: Arc<dyn NotificationStore>,
    pub delivery_log: Arc<dyn DeliveryLogStore>,
    pub preferences: Arc<dyn PreferenceStore>,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub notifications: Arc<NotificationService>,
    pub preferences: Arc<PreferenceService>,
    pub metrics: Arc<MetricsService>,
    pub retry_queue: Arc<RetryQueue>,
    pub transport: Arc<SessionTransport>,
    pub notification_store: Arc<dyn NotificationStore>,
    pub delivery_log: Arc<dyn DeliveryLogStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, backends: Backends, directory: Arc<dyn UserDirectory>) -> Self {
        let preferences = Arc::new(PreferenceService::new(backends.preferences.clone()));
        let cache = Arc::new(CounterCache::new(Duration::from_secs(
            settings.cache.unread_count_ttl_seconds,
        )));
        let transport = Arc::new(SessionTransport::new());
        let retry_queue = Arc::new(RetryQueue::new(RetryPolicy::from(&settings.retry)));

        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(EmailChannel::new(settings.smtp.clone())),
            Arc::new(PushChannel::new(settings.push.clone())),
        ];

        let orchestrator = Arc::new(DeliveryOrchestrator::new(
            directory,
            preferences.clone(),
            backends.delivery_log.clone(),
            channels,
            Duration::from_secs(settings.delivery.send_timeout_seconds),
        ));

        let notifications = Arc::new(NotificationService::new(
            backends.notifications.clone(),
            preferences.clone(),
            cache,
            transport.clone(),
            retry_queue.clone(),
            backends.delivery_log.clone(),
            orchestrator,
        ));

        let metrics = Arc::new(MetricsService::new(
            backends.notifications.clone(),
            backends.delivery_log.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            notifications,
            preferences,
            metrics,
            retry_queue,
            transport,
            notification_store: backends.notifications,
            delivery_log: backends.delivery_log,
            started_at: Instant::now(),
        }
    }
}
