use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::models::EntryStatus;
use crate::marketplace::models::OrderStatus;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bid rejected: {0}")]
    Bid(#[from] BidError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Bid validation errors
///
/// Each variant is a distinct rejection reason; a rejected bid mutates
/// nothing.
#[derive(Error, Debug)]
pub enum BidError {
    #[error("Listing not found: {0}")]
    ListingNotFound(Uuid),

    #[error("Listing is not an auction")]
    NotAnAuction,

    #[error("Listing is no longer active")]
    ListingInactive,

    #[error("Auction has ended")]
    AuctionEnded,

    #[error("Bidder not found: {0}")]
    BidderNotFound(Uuid),

    #[error("Bidder account is banned")]
    BidderBanned,

    #[error("Phone verification required before bidding")]
    PhoneNotVerified,

    #[error("Sellers cannot bid on their own listing")]
    OwnListing,

    #[error("Bidder already holds the highest bid")]
    AlreadyHighestBidder,

    #[error("Bid below minimum: minimum {minimum}, offered {offered}")]
    BelowMinimum { minimum: i64, offered: i64 },

    #[error("Bidding limit exceeded: limit {limit}, active {active}, attempted {attempted}")]
    LimitExceeded {
        limit: i64,
        active: i64,
        attempted: i64,
    },

    #[error("Listing changed while placing bid")]
    ConcurrentBid,
}

/// Ledger/settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid ledger entry transition: {from:?} -> {to:?}")]
    InvalidTransition { from: EntryStatus, to: EntryStatus },
}

/// Delivery/order state errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery order not found for external id: {0}")]
    DeliveryOrderNotFound(String),

    #[error("Invalid order transition: {from:?} -> {to:?}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order has no open reschedule window")]
    NoRescheduleWindow,

    #[error("Reschedule window has expired")]
    RescheduleWindowExpired,

    #[error("Delivery has not been completed yet")]
    NotDelivered,
}

/// Payout errors
#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Payout not found: {0}")]
    PayoutNotFound(Uuid),

    #[error("Payout already marked as paid: {0}")]
    AlreadyPaid(Uuid),

    #[error("No available funds for seller {seller_id} in that week")]
    NothingAvailable { seller_id: Uuid },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Bid(BidError::ListingNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "LISTING_NOT_FOUND",
                format!("Listing not found: {}", id),
                None,
            ),
            AppError::Bid(BidError::BidderNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "BIDDER_NOT_FOUND",
                format!("Bidder not found: {}", id),
                None,
            ),
            AppError::Bid(BidError::BidderBanned) => (
                StatusCode::FORBIDDEN,
                "BIDDER_BANNED",
                "Your account is banned from bidding".to_string(),
                None,
            ),
            AppError::Bid(BidError::PhoneNotVerified) => (
                StatusCode::FORBIDDEN,
                "PHONE_NOT_VERIFIED",
                "Phone verification is required before bidding".to_string(),
                None,
            ),
            AppError::Bid(BidError::LimitExceeded {
                limit,
                active,
                attempted,
            }) => (
                StatusCode::FORBIDDEN,
                "BIDDING_LIMIT_EXCEEDED",
                "Bidding limit exceeded".to_string(),
                Some(serde_json::json!({
                    "bidding_limit": limit,
                    "active_bids_value": active,
                    "attempted_bid": attempted,
                    "available_limit": limit - active,
                })),
            ),
            AppError::Bid(BidError::BelowMinimum { minimum, offered }) => (
                StatusCode::BAD_REQUEST,
                "BID_BELOW_MINIMUM",
                "Bid must be higher than the current bid".to_string(),
                Some(serde_json::json!({
                    "minimum_bid": minimum,
                    "offered": offered,
                })),
            ),
            AppError::Bid(BidError::ConcurrentBid) => (
                StatusCode::CONFLICT,
                "CONCURRENT_BID",
                "Another bid was accepted first, please retry".to_string(),
                None,
            ),
            AppError::Bid(err) => (
                StatusCode::BAD_REQUEST,
                "BID_REJECTED",
                err.to_string(),
                None,
            ),
            AppError::Delivery(DeliveryError::DeliveryOrderNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "DELIVERY_ORDER_NOT_FOUND",
                format!("Delivery order not found: {}", id),
                None,
            ),
            AppError::Delivery(DeliveryError::RescheduleWindowExpired) => (
                StatusCode::CONFLICT,
                "RESCHEDULE_WINDOW_EXPIRED",
                "The reschedule window has expired".to_string(),
                None,
            ),
            AppError::Delivery(err) => (
                StatusCode::CONFLICT,
                "DELIVERY_STATE_ERROR",
                err.to_string(),
                None,
            ),
            AppError::Payout(PayoutError::PayoutNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "PAYOUT_NOT_FOUND",
                format!("Payout not found: {}", id),
                None,
            ),
            AppError::Payout(PayoutError::AlreadyPaid(id)) => (
                StatusCode::CONFLICT,
                "PAYOUT_ALREADY_PAID",
                format!("Payout already marked as paid: {}", id),
                None,
            ),
            AppError::Payout(err) => (
                StatusCode::BAD_REQUEST,
                "PAYOUT_ERROR",
                err.to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
