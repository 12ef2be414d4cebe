//! Chat Sync - headless runner for the sync core
//!
//! Polls the configured user's notifications against the configured
//! endpoints and logs what arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_sync::remote::HttpTransport;
use chat_sync::storage::FileStore;
use chat_sync::sync::{LogNotifier, NotificationEvent};
use chat_sync::{SyncConfig, SyncContext, SyncCore};

/// Main entry point for the sync runner.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the file store and build the HTTP transport
/// 4. Wire all managers into a `SyncCore`
/// 5. Start notification polling for `SYNC_USER_ID`
/// 6. Wait for SIGINT/SIGTERM, then stop polling
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chat sync core");

    let config = SyncConfig::from_env();
    info!(
        endpoints = ?config.endpoints,
        call_timeout_ms = config.call_timeout.as_millis() as u64,
        max_attempts = config.max_attempts,
        poll_period_ms = config.poll_period.as_millis() as u64,
        "Configuration loaded"
    );

    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".chat_sync"));
    let store = FileStore::open(data_dir.clone())
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    let transport = HttpTransport::new(config.call_timeout).context("failed to build HTTP client")?;
    let user_id = config.user_id.clone();

    let ctx = SyncContext::new(config, Arc::new(transport), Arc::new(store));
    let core = SyncCore::new(ctx, Arc::new(LogNotifier));
    info!(data_dir = %data_dir.display(), "Sync core initialized");

    let _arrivals = core.notifications.subscribe(|event| {
        if let NotificationEvent::Arrived { user_id, notifications } = event {
            info!(user_id = %user_id, count = notifications.len(), "Notifications received");
        }
    });

    match &user_id {
        Some(user_id) => {
            match core.entities.list_communities(user_id).await {
                Ok(ids) => info!(user_id = %user_id, communities = ids.len(), "Community list loaded"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Community list unavailable"),
            }
            core.notifications.start_polling(user_id);
            info!(user_id = %user_id, "Notification polling started");
        }
        None => warn!("SYNC_USER_ID not set, nothing to poll"),
    }

    shutdown_signal().await;

    if let Some(user_id) = &user_id {
        core.notifications.stop_polling(user_id);
    }
    let stats = core.stats().total();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        stale_served = stats.stale_served,
        hit_rate = stats.hit_rate(),
        "Cache statistics"
    );
    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
