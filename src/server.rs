use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        accept_delivery, approve_return, close_auctions, closer_status, create_delivery,
        create_payout, delivery_webhook, get_monthly_quota, get_wallet_balance,
        get_wallet_transactions, health_check, mark_payout_paid, next_payout_date, payout_report,
        pending_payouts, place_bid, release_holds, reschedule_delivery, seller_payouts,
        user_notifications, webhook_health, AppState,
    },
    middleware::{
        rate_limit::{rate_limit_middleware, RateLimitLayer},
        webhook_auth::verify_webhook_auth,
    },
};

pub async fn create_app(state: AppState) -> Router {
    info!("Setting up HTTP routes...");

    // Bid submissions are rate limited
    let bid_routes = Router::new()
        .route("/bids", post(place_bid))
        .layer(from_fn(rate_limit_middleware))
        .layer(Extension(Arc::new(RateLimitLayer::new(30, 60))));

    // The courier webhook must present the shared secret
    let webhook_routes = Router::new()
        .route("/delivery/webhook", post(delivery_webhook))
        .route_layer(from_fn_with_state(state.clone(), verify_webhook_auth));

    let api = Router::new()
        .merge(bid_routes)
        .merge(webhook_routes)
        .route("/delivery/webhook/health", get(webhook_health))
        // Order lifecycle
        .route("/orders/:id/delivery", post(create_delivery))
        .route("/orders/:id/reschedule", post(reschedule_delivery))
        .route("/orders/:id/accept", post(accept_delivery))
        .route("/orders/:id/return", post(approve_return))
        // Seller wallet
        .route("/wallet/:seller_id", get(get_wallet_balance))
        .route("/wallet/:seller_id/transactions", get(get_wallet_transactions))
        .route("/wallet/:seller_id/quota", get(get_monthly_quota))
        // Payout batching
        .route("/payouts", post(create_payout))
        .route("/payouts/report", get(payout_report))
        .route("/payouts/pending", get(pending_payouts))
        .route("/payouts/next-date", get(next_payout_date))
        .route("/payouts/seller/:seller_id", get(seller_payouts))
        .route("/payouts/:id/paid", post(mark_payout_paid))
        // Notifications feed
        .route("/notifications/:user_id", get(user_notifications))
        // Admin operations
        .route("/admin/close-auctions", post(close_auctions))
        .route("/admin/closer-status", get(closer_status))
        .route("/admin/release-holds", post(release_holds));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
