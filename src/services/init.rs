//! Initialization helpers for the application:
//! - database connection + migrations
//! - provider gateway adapter construction
//! - background worker spawn helpers

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::db::repository::NotificationLogRepository;
use crate::services::channels::{
    ChannelAdapter, EmailAdapter, PushAdapter, SmsAdapter, WhatsappAdapter,
};

/// Initialize the SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable) and
/// opens a connection pool using `create_if_missing(true)`.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", db_url);

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build one adapter per configured provider gateway. Channels without
/// gateway credentials get no adapter and are skipped at dispatch time.
pub fn build_adapters(config: &Config) -> Vec<Arc<dyn ChannelAdapter>> {
    let timeout = Duration::from_millis(config.providers.request_timeout_ms);
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();

    if let Some(ref gateway) = config.providers.sms {
        adapters.push(Arc::new(SmsAdapter::new(gateway, timeout)));
    }
    if let Some(ref gateway) = config.providers.whatsapp {
        adapters.push(Arc::new(WhatsappAdapter::new(gateway, timeout)));
    }
    if let Some(ref gateway) = config.providers.email {
        adapters.push(Arc::new(EmailAdapter::new(gateway, timeout)));
    }
    if let Some(ref gateway) = config.providers.push {
        adapters.push(Arc::new(PushAdapter::new(gateway, timeout)));
    }

    if adapters.is_empty() {
        tracing::warn!("No provider gateways configured; every dispatch will be skipped");
    } else {
        let configured: Vec<&str> = adapters.iter().map(|a| a.channel().as_str()).collect();
        tracing::info!("Configured channels: {}", configured.join(", "));
    }

    adapters
}

/// Spawn background workers:
/// - stale-pending sweeper, which fails log entries stuck in `pending`
///   (crashed dispatches, deadline-abandoned sends)
///
/// Workers are `tokio::spawn` tasks that listen for a shutdown notification
/// via a `tokio::sync::broadcast::Sender<()>`; the handles are returned so
/// callers can await task shutdown.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.config.sweeper.enabled {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let interval = Duration::from_secs(state.config.sweeper.interval_seconds.max(1));
            let stale_after =
                chrono::Duration::seconds(state.config.sweeper.stale_after_seconds.max(1) as i64);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Stale-pending sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                let cutoff = Utc::now().naive_utc() - stale_after;
                match NotificationLogRepository::sweep_stale_pending(&state.db, cutoff).await {
                    Ok(0) => {}
                    Ok(swept) => {
                        tracing::warn!(swept, "Failed stale pending notification log entries");
                    }
                    Err(e) => {
                        tracing::warn!("Stale-pending sweep failed: {:?}", e);
                    }
                }
            }
        }));
    } else {
        tracing::info!("Stale-pending sweeper disabled");
    }

    handles
}
