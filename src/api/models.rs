use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// POST /bids
#[derive(Debug, Deserialize, Validate)]
pub struct PlaceBidRequest {
    pub listing_id: Uuid,
    pub user_id: Uuid,
    #[validate(range(min = 1, message = "bid amount must be positive"))]
    pub amount: i64,
    pub shipping_address_id: Uuid,
}

/// GET /payouts/report?week_start=...
#[derive(Debug, Deserialize)]
pub struct PayoutReportQuery {
    pub week_start: DateTime<Utc>,
}

/// POST /payouts
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePayoutRequest {
    pub seller_id: Uuid,
    pub week_start: DateTime<Utc>,
}

/// POST /payouts/:id/paid
#[derive(Debug, Deserialize, Validate)]
pub struct MarkPayoutPaidRequest {
    pub admin_id: Uuid,
    #[validate(length(min = 1, message = "payment method is required"))]
    pub payment_method: String,
    pub payment_reference: Option<String>,
}

/// POST /orders/:id/return
#[derive(Debug, Deserialize, Validate)]
pub struct ApproveReturnRequest {
    #[validate(length(min = 1, message = "a return reason is required"))]
    pub reason: String,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
pub struct WebhookAcceptedResponse {
    pub success: bool,
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}
