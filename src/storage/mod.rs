pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::delivery::models::{CourierEvent, DeliveryOrder, NewDeliveryOrder};
use crate::error::AppResult;
use crate::ledger::models::{LedgerEntry, MonthlyQuota, NewLedgerEntry, NewPayout, Payout};
use crate::marketplace::models::{
    Bid, Listing, NewBid, NewListing, NewOrder, NewUser, Order, OrderStatus, User,
};
use crate::notify::{NewNotification, Notification};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// The injected repository the core runs against - THE source of truth for
/// all state. Every state transition below is conditional on the current
/// state (compare-and-set), so concurrent callers cannot blindly overwrite
/// each other; implementations must make each method atomic.
#[async_trait]
pub trait MarketStore: Send + Sync {
    // ========== USERS ==========

    async fn create_user(&self, user: NewUser) -> AppResult<User>;

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Apply a temporary ordering ban and bump the no-answer counter
    async fn apply_order_ban(&self, user_id: Uuid, until: DateTime<Utc>) -> AppResult<()>;

    // ========== LISTINGS & BIDS ==========

    async fn create_listing(&self, listing: NewListing) -> AppResult<Listing>;

    async fn get_listing(&self, id: Uuid) -> AppResult<Option<Listing>>;

    /// Atomically accept a bid: insert the bid row and update the listing's
    /// current_bid / highest_bidder_id / total_bids, conditional on
    /// `current_bid` still being `expected_current_bid`. Returns `None`
    /// when a concurrent bid won the race (nothing is written).
    async fn try_apply_bid(
        &self,
        expected_current_bid: Option<i64>,
        bid: NewBid,
    ) -> AppResult<Option<Bid>>;

    /// Move the auction deadline forward to `new_end`. The deadline never
    /// moves backward: returns false (and writes nothing) when `new_end`
    /// does not extend the current deadline.
    async fn extend_auction_end(
        &self,
        listing_id: Uuid,
        new_end: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Active auctions whose deadline passed before `cutoff`
    async fn expired_active_auctions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Listing>>;

    /// Deactivate a listing, recording the final bid when one exists
    async fn close_listing(&self, listing_id: Uuid, final_bid: Option<i64>) -> AppResult<()>;

    /// Sum of the bids the user is currently winning across active
    /// auctions - their open exposure counted against the bidding limit
    async fn winning_bid_exposure(&self, user_id: Uuid) -> AppResult<i64>;

    /// All bids on a listing, highest amount first, earliest first among
    /// equal amounts
    async fn bids_for_listing(&self, listing_id: Uuid) -> AppResult<Vec<Bid>>;

    // ========== ORDERS ==========

    async fn create_order(&self, order: NewOrder) -> AppResult<Order>;

    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>>;

    /// Transition an order `from` -> `to`, validating against the order
    /// state machine. Same-status calls are accepted and write nothing.
    /// Returns false when the order was no longer in `from` (lost race).
    /// Stamps delivered_at/completed_at/cancelled_at as appropriate.
    async fn set_order_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
    ) -> AppResult<bool>;

    /// Open the no-answer reschedule window: status -> no_answer_pending
    /// with the given deadline
    async fn open_no_answer_window(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        deadline: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Close the window after a successful reschedule:
    /// no_answer_pending -> pending, deadline cleared
    async fn clear_no_answer_window(&self, order_id: Uuid) -> AppResult<bool>;

    /// Zero-on-refusal: permanently forbid settlement creation for the
    /// order and move it to `refused` when the state machine allows it.
    /// The block flag is set unconditionally; the returned bool reports
    /// whether the status transition applied.
    async fn block_order_settlement(&self, order_id: Uuid, reason: String) -> AppResult<bool>;

    /// Orders whose no-answer window expired unused
    async fn expired_no_answer_orders(&self, now: DateTime<Utc>) -> AppResult<Vec<Order>>;

    // ========== LEDGER ==========

    /// Insert a group of entries as one atomic write
    async fn insert_ledger_entries(
        &self,
        entries: Vec<NewLedgerEntry>,
    ) -> AppResult<Vec<LedgerEntry>>;

    async fn entries_for_order(&self, order_id: Uuid) -> AppResult<Vec<LedgerEntry>>;

    /// All of a seller's entries, newest first
    async fn entries_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<LedgerEntry>>;

    /// Flip every pending/available non-reversal entry of the order to
    /// `reversed` and return (flipped count, the order's still-paid
    /// entries needing out-of-band compensation)
    async fn reverse_unpaid_entries(&self, order_id: Uuid) -> AppResult<(u64, Vec<LedgerEntry>)>;

    /// Promote pending entries whose hold expired to `available`,
    /// stamping available_at. Returns the number of rows moved.
    async fn release_held_entries(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Available entries with available_at in [start, end)
    async fn available_entries_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<LedgerEntry>>;

    // ========== MONTHLY QUOTAS ==========

    async fn get_or_create_monthly_quota(
        &self,
        seller_id: Uuid,
        month: i32,
        year: i32,
    ) -> AppResult<MonthlyQuota>;

    async fn update_monthly_quota(&self, quota: MonthlyQuota) -> AppResult<()>;

    // ========== PAYOUTS ==========

    /// Insert the payout row and, in the same atomic operation, flip every
    /// matching `available` entry of that seller/week to `paid` with the
    /// payout id back-reference. Errors with `PayoutError::NothingAvailable`
    /// when no entry matches (no orphan payout row is written).
    async fn create_weekly_payout(&self, payout: NewPayout) -> AppResult<(Payout, u64)>;

    async fn get_payout(&self, id: Uuid) -> AppResult<Option<Payout>>;

    /// Record the out-of-band transfer: status pending -> paid plus the
    /// admin/method/reference metadata. Returns false when the payout was
    /// not pending.
    async fn mark_payout_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        method: String,
        reference: Option<String>,
    ) -> AppResult<bool>;

    async fn payouts_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<Payout>>;

    async fn pending_payouts(&self) -> AppResult<Vec<Payout>>;

    // ========== DELIVERY ORDERS ==========

    async fn create_delivery_order(
        &self,
        delivery: NewDeliveryOrder,
    ) -> AppResult<DeliveryOrder>;

    async fn get_delivery_by_external(
        &self,
        external_id: &str,
    ) -> AppResult<Option<DeliveryOrder>>;

    /// The order's current shipment (the most recently created one)
    async fn latest_delivery_for_order(&self, order_id: Uuid)
        -> AppResult<Option<DeliveryOrder>>;

    /// Merge a courier event into the delivery order row
    async fn apply_courier_update(
        &self,
        delivery_id: Uuid,
        event: &CourierEvent,
    ) -> AppResult<DeliveryOrder>;

    /// At-most-once settlement claim: false -> true. Returns false when the
    /// shipment already triggered a settlement.
    async fn mark_settlement_recorded(&self, delivery_id: Uuid) -> AppResult<bool>;

    /// Roll the claim back after a failed settlement write so the webhook
    /// retry can settle again
    async fn unmark_settlement_recorded(&self, delivery_id: Uuid) -> AppResult<()>;

    // ========== NOTIFICATIONS ==========

    async fn create_notification(&self, notification: NewNotification)
        -> AppResult<Notification>;

    async fn notifications_for_user(&self, user_id: Uuid) -> AppResult<Vec<Notification>>;
}
