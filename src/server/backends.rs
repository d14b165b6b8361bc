//! Store backend factory.
//!
//! Selects the storage implementation behind the store traits based on the
//! `store.backend` setting:
//! - `"postgres"`: sqlx-backed stores over a shared pool (migrations applied
//!   on startup)
//! - `"memory"` (default): DashMap-backed stores, suitable for development
//!   and tests

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::StoreConfig;
use crate::delivery::{MemoryDeliveryLogStore, PostgresDeliveryLogStore};
use crate::notification::{MemoryNotificationStore, PostgresNotificationStore};
use crate::preferences::{MemoryPreferenceStore, PostgresPreferenceStore};

use super::state::Backends;

pub async fn create_backends(config: &StoreConfig) -> anyhow::Result<Backends> {
    match config.backend.as_str() {
        "postgres" => {
            let url = config
                .database_url
                .as_deref()
                .context("store.backend = postgres requires store.database_url")?;

            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("failed to run database migrations")?;

            tracing::info!(
                backend = "postgres",
                max_connections = config.max_connections,
                "Storage backends initialized"
            );

            Ok(Backends {
                notifications: Arc::new(PostgresNotificationStore::new(pool.clone())),
                delivery_log: Arc::new(PostgresDeliveryLogStore::new(pool.clone())),
                preferences: Arc::new(PostgresPreferenceStore::new(pool)),
            })
        }
        other => {
            if other != "memory" {
                tracing::warn!(
                    backend = %other,
                    "Unknown store backend, falling back to memory"
                );
            } else {
                tracing::info!(backend = "memory", "Storage backends initialized");
            }

            Ok(Backends {
                notifications: Arc::new(MemoryNotificationStore::new()),
                delivery_log: Arc::new(MemoryDeliveryLogStore::new()),
                preferences: Arc::new(MemoryPreferenceStore::new()),
            })
        }
    }
}
