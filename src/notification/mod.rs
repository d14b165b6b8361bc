//! Notification domain: types, storage and the orchestrating service.

mod memory_store;
mod postgres_store;
mod service;
mod store;
mod types;

pub use memory_store::MemoryNotificationStore;
pub use postgres_store::PostgresNotificationStore;
pub use service::{NotificationService, DEFAULT_GROUP_WINDOW_MINUTES};
pub use store::{Cursor, ListQuery, NotificationPage, NotificationStore};
pub use types::{Metadata, Notification, NotificationType};
