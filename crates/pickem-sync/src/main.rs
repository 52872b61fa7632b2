// Pick'em sync service entry point.
//
// Startup sequence:
// 1. Load config (logging settings live there)
// 2. Initialize tracing (log to file)
// 3. Open database, ensure the configured season exists
// 4. Build the league service and ESPN feed client
// 5. Spawn the poller and an event logger
// 6. Wait for Ctrl+C, then shut down cooperatively

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use pickem_core::config::{self, LoggingConfig};
use pickem_core::db::Database;
use pickem_core::{LeagueRules, LeagueService};
use pickem_sync::feed::EspnFeed;
use pickem_sync::poller::Poller;
use pickem_sync::retry::RetryPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.logging)?;
    info!(
        league = %config.league.name,
        season = config.league.season_year,
        "pickem sync starting up"
    );

    // 3. Open database
    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!(path = %config.db_path, "database opened");

    // 4. League service and feed
    let service = Arc::new(LeagueService::new(db, LeagueRules::from(&config.league)));
    let season = service
        .ensure_season(&config.league)
        .context("failed to set up current season")?;
    info!(season_id = season.id, year = season.year, "current season ready");

    let feed = EspnFeed::new(&config.feed, RetryPolicy::from(&config.retry))?;

    // 5. Spawn background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let events = service.subscribe();
    let events_handle = tokio::spawn(log_events(events, shutdown_rx.clone()));

    let poller = Poller::new(Arc::clone(&service), feed, config.poller.clone());
    let poller_handle = tokio::spawn(async move {
        if let Err(e) = poller.run(shutdown_rx).await {
            error!("Poller error: {e:#}");
        }
    });

    // 6. Wait for Ctrl+C
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_handle.await;
        let _ = events_handle.await;
    })
    .await;

    info!("pickem sync shut down cleanly");
    Ok(())
}

/// Write league events to the log until shutdown.
async fn log_events(
    mut events: broadcast::Receiver<pickem_core::events::LeagueEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %json, "league event"),
                    Err(e) => debug!(error = %e, "unserializable league event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Initialize tracing to log to a file under the configured directory.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join(&logging.directory);
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("pickem.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
