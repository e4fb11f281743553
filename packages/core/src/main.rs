use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use lostpaws_notifier::api;
use lostpaws_notifier::channels::http::{HttpEmailGateway, HttpPushGateway};
use lostpaws_notifier::channels::mock::MockRealtimeTransport;
use lostpaws_notifier::channels::CosineSimilarity;
use lostpaws_notifier::cli::Cli;
use lostpaws_notifier::config::AppConfig;
use lostpaws_notifier::db;
use lostpaws_notifier::dispatch::NotificationDispatcher;
use lostpaws_notifier::geofence::GeofenceEngine;
use lostpaws_notifier::logging::init_logging;
use lostpaws_notifier::matching::MatchingEngine;
use lostpaws_notifier::metrics::AppMetrics;
use lostpaws_notifier::reminder::ReminderEngine;
use lostpaws_notifier::repository::Repository;
use lostpaws_notifier::scheduler::EngineScheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().map_err(|err| {
        error!(error = %err, "configuration error");
        err
    })?;
    cli.apply_to(&mut config);

    info!(database_url = %config.database_url, "starting lostpaws-notifier");

    let pool = db::create_pool(&config.database_url).await?;
    let repo = Arc::new(Repository::new(pool));
    let metrics = AppMetrics::new()?;

    let push = Arc::new(HttpPushGateway::new(
        config.push_gateway_url.clone(),
        config.push_gateway_api_key.clone(),
    ));
    let email = Arc::new(HttpEmailGateway::new(config.email_gateway_url.clone()));
    // The realtime hub lives in the main application; until a transport is
    // wired up, in-app delivery is the persisted record alone.
    let realtime = Arc::new(MockRealtimeTransport::new());

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&repo),
        push,
        email,
        realtime,
        metrics.clone(),
    ));

    let matching = Arc::new(MatchingEngine::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        Arc::new(CosineSimilarity),
        metrics.clone(),
    ));
    let geofence = Arc::new(GeofenceEngine::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        metrics.clone(),
    ));
    let reminder = Arc::new(ReminderEngine::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        metrics.clone(),
    ));

    let scheduler = Arc::new(EngineScheduler::new(
        Arc::clone(&repo),
        Arc::clone(&dispatcher),
        matching,
        geofence,
        reminder,
        metrics.clone(),
        config.intervals(),
    ));
    scheduler.start().await?;

    let app = api::router(metrics);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "health and metrics endpoints up");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
