mod bootstrap;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use telemetry_core::formatting::format_snapshot;
use telemetry_core::settings::Settings;
use telemetry_runtime::publisher::Publisher;
use telemetry_runtime::subscription::{SubscriptionManager, SubscriptionState, ViewConfig};
use telemetry_transport::router::{TransportOptions, TransportRouter};
use telemetry_transport::stream::ReconnectPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("Live Telemetry v{} starting", env!("CARGO_PKG_VERSION"));

    let endpoints = settings.endpoints()?;
    let options = TransportOptions {
        request_timeout: settings.request_timeout(),
        reconnect: ReconnectPolicy {
            max_retries: settings.reconnect_attempts,
            max_backoff: settings.max_backoff(),
            ..ReconnectPolicy::default()
        },
    };
    let router =
        TransportRouter::connect(&endpoints, &options).context("failed to set up transports")?;

    match settings.mode.as_str() {
        "publish" => publish(&settings, router).await,
        _ => watch(&settings, router).await,
    }
}

/// Show the sliding window on stdout until Ctrl+C or failure.
async fn watch(settings: &Settings, router: TransportRouter) -> Result<()> {
    let view = ViewConfig::telemetry(Utc::now(), settings.window_capacity())
        .with_stall_timeout(settings.stall_timeout());
    let (manager, mut snapshots) = SubscriptionManager::new(router, view);
    let handle = manager.spawn();

    tracing::info!(capacity = settings.capacity, "watching live telemetry");

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Some(snapshot) => println!("{}", format_snapshot(&snapshot.points, snapshot.capacity)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; closing subscription");
                handle.cancel();
            }
        }
    }

    match handle.join().await {
        SubscriptionState::Failed(failure) => bail!("{failure}"),
        state => {
            tracing::info!(?state, "view finished");
            Ok(())
        }
    }
}

/// Publish random readings until Ctrl+C.
async fn publish(settings: &Settings, router: TransportRouter) -> Result<()> {
    let publisher = Publisher::new(router, settings.device_id.clone(), settings.publish_interval());
    let handle = publisher.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received; stopping publisher");
    handle.abort();

    Ok(())
}
