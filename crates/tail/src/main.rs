//! Follow a bus channel from the command line.
//!
//! Connects to PostgreSQL, applies migrations, subscribes to
//! `BUS_TAIL_CHANNEL` (default `*`) and logs every delivered message until
//! SIGINT/SIGTERM, then shuts the bus down cleanly.

use std::sync::Arc;

use anyhow::Context;
use pollbus_core::channels::WILDCARD_CHANNEL;
use pollbus_events::{handler_fn, BusConfig, MessageBus, PgMessageStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollbus_events=debug,pollbus_tail=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = BusConfig::from_env();
    let channel =
        std::env::var("BUS_TAIL_CHANNEL").unwrap_or_else(|_| WILDCARD_CHANNEL.to_string());
    tracing::info!(
        %channel,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        retention_secs = config.retention.as_secs(),
        "Loaded bus configuration"
    );

    // --- Store ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgMessageStore::connect(&database_url)
        .await
        .context("Failed to open message store")?;

    // --- Bus ---
    let bus = MessageBus::start(Arc::new(store), config)
        .await
        .context("Failed to start message bus")?;

    let subscription = bus
        .subscribe_pattern(
            &channel,
            handler_fn(|ctx, message| async move {
                tracing::info!(
                    subscription_id = ctx.subscription_id(),
                    message_id = message.id,
                    channel = %message.channel,
                    created_at = %message.created_at,
                    payload = %message.payload,
                    "Message"
                );
                anyhow::Ok(())
            }),
        )
        .await?;
    tracing::info!(subscription_id = subscription.id(), "Tailing");

    shutdown_signal().await;

    // --- Shutdown ---
    match bus.stats().await {
        Ok(stats) => tracing::info!(
            delivered = stats.counters.delivered,
            dropped = stats.counters.dropped,
            cursor = stats.cursor,
            "Final bus stats"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not read final bus stats"),
    }
    bus.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
