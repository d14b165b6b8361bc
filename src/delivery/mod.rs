//! Multi-channel notification delivery.

mod channel;
mod email;
mod log;
mod metrics;
mod orchestrator;
mod push;

pub use channel::{ChannelError, ChannelKind, NotificationChannel};
pub use email::EmailChannel;
pub use log::{
    DeliveryLogEntry, DeliveryLogStore, DeliveryStatus, MemoryDeliveryLogStore,
    PostgresDeliveryLogStore,
};
pub use metrics::{ActivityEntry, HealthReport, MetricsService, MetricsSummary};
pub use orchestrator::DeliveryOrchestrator;
pub use push::PushChannel;
