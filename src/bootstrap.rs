use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use crate::{
    api::handler::AppState,
    config::Config,
    delivery::{
        CourierApi, DeliveryConfig, DeliveryService, HttpCourierClient, ReturnReversalHandler,
    },
    error::AppResult,
    ledger::{LedgerConfig, LedgerEngine, PayoutBatcher},
    marketplace::{AuctionCloser, BidConfig, BidProcessor, CloserConfig},
    notify::{broadcast::AuctionFeedBroadcaster, Notifier, PushClient},
    storage::{MarketStore, PgStore},
};

/// How often the hold sweep and the no-answer sweep run
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components...");

    let pool = initialize_database(&config.database_url).await?;
    let store: Arc<dyn MarketStore> = Arc::new(PgStore::new(pool));

    let feed = Arc::new(AuctionFeedBroadcaster::new());

    let push = match (&config.push_api_url, &config.push_api_key) {
        (Some(url), Some(key)) => {
            info!("Push gateway configured: {}", url);
            Some(Arc::new(PushClient::new(url.clone(), key.clone())))
        }
        _ => {
            info!("Push gateway not configured, in-app notifications only");
            None
        }
    };
    let notifier = Arc::new(Notifier::new(store.clone(), push));

    let ledger = Arc::new(LedgerEngine::new(store.clone(), LedgerConfig::default()));
    let payouts = Arc::new(PayoutBatcher::new(store.clone()));

    let bids = Arc::new(BidProcessor::new(
        store.clone(),
        notifier.clone(),
        feed.clone(),
        BidConfig::default(),
    ));

    let closer = Arc::new(AuctionCloser::new(
        store.clone(),
        notifier.clone(),
        feed.clone(),
        CloserConfig::default(),
    ));

    let courier: Arc<dyn CourierApi> = Arc::new(HttpCourierClient::new(
        config.courier_api_url.clone(),
        config.courier_api_key.clone(),
    ));
    let delivery = Arc::new(DeliveryService::new(
        store.clone(),
        ledger.clone(),
        courier,
        notifier.clone(),
        DeliveryConfig::default(),
    ));

    let returns = Arc::new(ReturnReversalHandler::new(store.clone(), ledger.clone()));

    // Background jobs
    let _closer_handle = closer.start();

    let sweep_ledger = ledger.clone();
    let sweep_delivery = delivery.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;

            if let Err(e) = sweep_ledger.process_hold_period_expiry().await {
                error!("Hold period sweep failed: {}", e);
            }

            match sweep_delivery.process_expired_no_answer_windows().await {
                Ok(cancelled) if cancelled > 0 => {
                    info!("No-answer sweep cancelled {} orders", cancelled);
                }
                Ok(_) => {}
                Err(e) => error!("No-answer sweep failed: {}", e),
            }
        }
    });
    info!(
        "Maintenance sweep started (every {}s)",
        MAINTENANCE_INTERVAL.as_secs()
    );

    Ok(AppState {
        store,
        bids,
        closer,
        ledger,
        payouts,
        delivery,
        returns,
        feed,
        webhook_secret: config.courier_webhook_secret.clone(),
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}
