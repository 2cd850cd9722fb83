use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    delivery::models::{CourierEvent, DeliveryOrder},
    delivery::{DeliveryService, ReturnReversalHandler},
    error::{AppError, AppResult, PayoutError},
    ledger::models::{LedgerEntry, MonthlyQuota, Payout, SellerPayoutSummary, WalletBalance},
    ledger::{LedgerEngine, PayoutBatcher},
    marketplace::closer::CloserStatus,
    marketplace::models::{AuctionResult, Bid},
    marketplace::{AuctionCloser, BidProcessor},
    notify::broadcast::AuctionFeedBroadcaster,
    storage::MarketStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MarketStore>,
    pub bids: Arc<BidProcessor>,
    pub closer: Arc<AuctionCloser>,
    pub ledger: Arc<LedgerEngine>,
    pub payouts: Arc<PayoutBatcher>,
    pub delivery: Arc<DeliveryService>,
    pub returns: Arc<ReturnReversalHandler>,
    pub feed: Arc<AuctionFeedBroadcaster>,
    /// Shared secret the courier must present on webhook calls
    pub webhook_secret: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// Place a bid on an auction listing
/// POST /api/v1/bids
pub async fn place_bid(
    State(state): State<AppState>,
    Json(request): Json<PlaceBidRequest>,
) -> AppResult<(StatusCode, Json<Bid>)> {
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let bid = state
        .bids
        .place_bid(
            request.listing_id,
            request.user_id,
            request.amount,
            request.shipping_address_id,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(bid)))
}

/// Courier status webhook (authenticated by middleware)
/// POST /api/v1/delivery/webhook
pub async fn delivery_webhook(
    State(state): State<AppState>,
    Json(event): Json<CourierEvent>,
) -> AppResult<Json<WebhookAcceptedResponse>> {
    state.delivery.process_webhook(event).await?;

    Ok(Json(WebhookAcceptedResponse {
        success: true,
        message: "Webhook processed successfully".to_string(),
    }))
}

/// Connectivity check for the courier
/// GET /api/v1/delivery/webhook/health
pub async fn webhook_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// Book a shipment for an order
/// POST /api/v1/orders/:id/delivery
pub async fn create_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<DeliveryOrder>)> {
    let delivery = state.delivery.create_delivery_order(order_id).await?;
    Ok((StatusCode::CREATED, Json(delivery)))
}

/// Buyer requests another delivery attempt inside the no-answer window
/// POST /api/v1/orders/:id/reschedule
pub async fn reschedule_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<DeliveryOrder>> {
    let delivery = state.delivery.reschedule_delivery(order_id).await?;
    Ok(Json(delivery))
}

/// Buyer confirms acceptance of the delivered item
/// POST /api/v1/orders/:id/accept
pub async fn accept_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.delivery.confirm_delivery_acceptance(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Approved return: reverse the order's settlement
/// POST /api/v1/orders/:id/return
pub async fn approve_return(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ApproveReturnRequest>,
) -> AppResult<StatusCode> {
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    state.returns.approve_return(order_id, &request.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Seller wallet balance by status bucket
/// GET /api/v1/wallet/:seller_id
pub async fn get_wallet_balance(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
) -> AppResult<Json<WalletBalance>> {
    let balance = state.ledger.get_wallet_balance(seller_id).await?;
    Ok(Json(balance))
}

/// Seller ledger history
/// GET /api/v1/wallet/:seller_id/transactions
pub async fn get_wallet_transactions(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    let entries = state.ledger.wallet_entries(seller_id).await?;
    Ok(Json(entries))
}

/// Seller's commission quota for the current month
/// GET /api/v1/wallet/:seller_id/quota
pub async fn get_monthly_quota(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
) -> AppResult<Json<MonthlyQuota>> {
    let quota = state.ledger.get_monthly_quota(seller_id).await?;
    Ok(Json(quota))
}

/// Weekly payout report, grouped by seller
/// GET /api/v1/payouts/report?week_start=...
pub async fn payout_report(
    State(state): State<AppState>,
    Query(query): Query<PayoutReportQuery>,
) -> AppResult<Json<Vec<SellerPayoutSummary>>> {
    let report = state
        .payouts
        .generate_weekly_payout_report(query.week_start)
        .await?;
    Ok(Json(report))
}

/// Create the weekly payout batch for one seller
/// POST /api/v1/payouts
pub async fn create_payout(
    State(state): State<AppState>,
    Json(request): Json<CreatePayoutRequest>,
) -> AppResult<(StatusCode, Json<Payout>)> {
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let report = state
        .payouts
        .generate_weekly_payout_report(request.week_start)
        .await?;
    let summary = report
        .into_iter()
        .find(|s| s.seller_id == request.seller_id)
        .ok_or(PayoutError::NothingAvailable {
            seller_id: request.seller_id,
        })?;

    let payout = state
        .payouts
        .create_weekly_payout(request.seller_id, request.week_start, &summary)
        .await?;

    Ok((StatusCode::CREATED, Json(payout)))
}

/// Record the out-of-band transfer for a payout
/// POST /api/v1/payouts/:id/paid
pub async fn mark_payout_paid(
    State(state): State<AppState>,
    Path(payout_id): Path<Uuid>,
    Json(request): Json<MarkPayoutPaidRequest>,
) -> AppResult<Json<Payout>> {
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let payout = state
        .payouts
        .mark_payout_as_paid(
            payout_id,
            request.admin_id,
            request.payment_method,
            request.payment_reference,
        )
        .await?;

    Ok(Json(payout))
}

/// GET /api/v1/payouts/pending
pub async fn pending_payouts(State(state): State<AppState>) -> AppResult<Json<Vec<Payout>>> {
    let payouts = state.payouts.pending_payouts().await?;
    Ok(Json(payouts))
}

/// GET /api/v1/payouts/next-date
pub async fn next_payout_date() -> Json<chrono::DateTime<Utc>> {
    Json(PayoutBatcher::next_payout_date(Utc::now()))
}

/// A user's in-app notification feed
/// GET /api/v1/notifications/:user_id
pub async fn user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<crate::notify::Notification>>> {
    let notifications = state.store.notifications_for_user(user_id).await?;
    Ok(Json(notifications))
}

/// GET /api/v1/payouts/seller/:seller_id
pub async fn seller_payouts(
    State(state): State<AppState>,
    Path(seller_id): Path<Uuid>,
) -> AppResult<Json<Vec<Payout>>> {
    let payouts = state.payouts.seller_payouts(seller_id).await?;
    Ok(Json(payouts))
}

/// Manually trigger a closing cycle
/// POST /api/v1/admin/close-auctions
pub async fn close_auctions(State(state): State<AppState>) -> Json<Vec<AuctionResult>> {
    let results = state.closer.process_all_ended_auctions().await;
    Json(results)
}

/// GET /api/v1/admin/closer-status
pub async fn closer_status(State(state): State<AppState>) -> Json<CloserStatus> {
    Json(state.closer.status())
}

/// Manually release expired holds
/// POST /api/v1/admin/release-holds
pub async fn release_holds(State(state): State<AppState>) -> AppResult<Json<u64>> {
    let released = state.ledger.process_hold_period_expiry().await?;
    Ok(Json(released))
}
