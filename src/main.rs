use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use carmarket_notification_service::config::Settings;
use carmarket_notification_service::identity::MemoryUserDirectory;
use carmarket_notification_service::retry::RetryEngine;
use carmarket_notification_service::server::{create_app, create_backends, AppState};
use carmarket_notification_service::transport::RealtimeTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Create storage backends and application state
    let backends = create_backends(&settings.store).await?;
    let directory = Arc::new(MemoryUserDirectory::new());
    let state = AppState::new(settings.clone(), backends, directory);
    tracing::info!("Application state initialized");

    // Shutdown signal shared with background tasks
    let (shutdown_tx, _) = broadcast::channel(1);

    // Start the retry engine in background
    let retry_engine = RetryEngine::new(
        state.retry_queue.clone(),
        state.notification_store.clone(),
        state.delivery_log.clone(),
        state.transport.clone() as Arc<dyn RealtimeTransport>,
        Duration::from_secs(settings.retry.tick_interval_seconds),
        shutdown_tx.subscribe(),
    );
    let retry_handle = tokio::spawn(async move {
        retry_engine.run().await;
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(retry_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the retry engine
    let _ = shutdown_tx.send(());
}
