use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::error::DeliveryError;

/// How a listing is sold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "sale_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SaleType {
    Auction,
    FixedPrice,
}

/// Marketplace user (the slice the core reads and writes)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub phone: String,
    pub phone_verified: bool,
    pub is_banned: bool,
    /// Maximum total value of simultaneously winning bids, in IQD
    pub bidding_limit: i64,
    pub no_answer_count: i32,
    pub order_ban_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub display_name: String,
    pub phone: String,
    pub phone_verified: bool,
    pub is_banned: bool,
    pub bidding_limit: i64,
}

/// Listing entity
///
/// Invariants: `current_bid` only ever grows; `auction_end_time` only ever
/// moves forward (the anti-sniping extension slides it, nothing shortens it).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub sale_type: SaleType,
    /// Starting price, also the minimum first bid
    pub price: i64,
    pub current_bid: Option<i64>,
    pub highest_bidder_id: Option<Uuid>,
    pub total_bids: i32,
    pub shipping_cost: i64,
    pub auction_end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Minimum amount the next bid must reach
    pub fn minimum_next_bid(&self, increment: i64) -> i64 {
        match self.current_bid {
            Some(current) => current + increment,
            None => self.price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub seller_id: Uuid,
    pub title: String,
    pub sale_type: SaleType,
    pub price: i64,
    pub shipping_cost: i64,
    pub auction_end_time: Option<DateTime<Utc>>,
}

/// Bid entity - immutable once created, never updated or deleted
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bid {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub shipping_address_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBid {
    pub listing_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub shipping_address_id: Uuid,
}

/// Order status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    NoAnswerPending,
    PendingAcceptance,
    Completed,
    Returned,
    Refused,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::NoAnswerPending => "no_answer_pending",
            OrderStatus::PendingAcceptance => "pending_acceptance",
            OrderStatus::Completed => "completed",
            OrderStatus::Returned => "returned",
            OrderStatus::Refused => "refused",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Validate order state machine transitions.
    ///
    /// Same-status "transitions" are accepted so a redelivered courier
    /// webhook is a no-op rather than an error.
    ///
    /// Valid transitions:
    /// - pending <-> processing (courier pickup progress)
    /// - pending/processing -> pending_acceptance, no_answer_pending,
    ///   returned, refused, cancelled
    /// - no_answer_pending -> pending (reschedule), pending_acceptance
    ///   (driver completed a later attempt), cancelled (window expiry)
    /// - pending_acceptance -> completed, returned
    /// - completed -> returned (approved return after completion)
    /// - returned/refused/cancelled are terminal
    pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), DeliveryError> {
        if from == to {
            return Ok(());
        }

        let allowed: &[OrderStatus] = match from {
            OrderStatus::Pending | OrderStatus::Processing => &[
                OrderStatus::Pending,
                OrderStatus::Processing,
                OrderStatus::PendingAcceptance,
                OrderStatus::NoAnswerPending,
                OrderStatus::Returned,
                OrderStatus::Refused,
                OrderStatus::Cancelled,
            ],
            OrderStatus::NoAnswerPending => &[
                OrderStatus::Pending,
                OrderStatus::PendingAcceptance,
                OrderStatus::Cancelled,
            ],
            OrderStatus::PendingAcceptance => &[OrderStatus::Completed, OrderStatus::Returned],
            OrderStatus::Completed => &[OrderStatus::Returned],
            OrderStatus::Returned | OrderStatus::Refused | OrderStatus::Cancelled => &[],
        };

        if allowed.contains(&to) {
            Ok(())
        } else {
            Err(DeliveryError::InvalidOrderTransition { from, to })
        }
    }
}

/// Order entity - created once per won auction (or checkout)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount: i64,
    pub status: OrderStatus,
    pub delivery_address_id: Option<Uuid>,
    /// Set by zero-on-refusal; once set, no settlement may ever be created
    pub settlement_blocked: bool,
    pub no_answer_deadline: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub issue_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount: i64,
    pub status: OrderStatus,
    pub delivery_address_id: Option<Uuid>,
}

/// Per-listing outcome of one closing pass, kept for observability
#[derive(Debug, Clone, Serialize)]
pub struct AuctionResult {
    pub listing_id: Uuid,
    pub listing_title: String,
    pub seller_id: Uuid,
    pub winner_id: Option<Uuid>,
    pub winning_bid: Option<i64>,
    pub total_bids: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
