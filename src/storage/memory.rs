use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::delivery::models::{CourierEvent, DeliveryOrder, DeliveryStatus, NewDeliveryOrder};
use crate::error::{AppError, AppResult, PayoutError};
use crate::ledger::models::{
    EntryKind, EntryStatus, LedgerEntry, MonthlyQuota, NewLedgerEntry, NewPayout, Payout,
    PayoutStatus,
};
use crate::marketplace::models::{
    Bid, Listing, NewBid, NewListing, NewOrder, NewUser, Order, OrderStatus, SaleType, User,
};
use crate::notify::{NewNotification, Notification};
use crate::storage::MarketStore;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    listings: HashMap<Uuid, Listing>,
    bids: HashMap<Uuid, Bid>,
    orders: HashMap<Uuid, Order>,
    entries: HashMap<Uuid, LedgerEntry>,
    quotas: HashMap<Uuid, MonthlyQuota>,
    payouts: HashMap<Uuid, Payout>,
    deliveries: HashMap<Uuid, DeliveryOrder>,
    notifications: HashMap<Uuid, Notification>,
}

/// In-memory store used by the test suite and for local development.
///
/// All tables live behind a single lock so the multi-table operations
/// (bid acceptance, payout batching) are atomic exactly like their
/// single-transaction Postgres counterparts.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    // ========== USERS ==========

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut tables = self.tables.write().await;
        let user = User {
            id: Uuid::new_v4(),
            display_name: user.display_name,
            phone: user.phone,
            phone_verified: user.phone_verified,
            is_banned: user.is_banned,
            bidding_limit: user.bidding_limit,
            no_answer_count: 0,
            order_ban_until: None,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn apply_order_ban(&self, user_id: Uuid, until: DateTime<Utc>) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;
        user.no_answer_count += 1;
        user.order_ban_until = Some(until);
        Ok(())
    }

    // ========== LISTINGS & BIDS ==========

    async fn create_listing(&self, listing: NewListing) -> AppResult<Listing> {
        let mut tables = self.tables.write().await;
        let listing = Listing {
            id: Uuid::new_v4(),
            seller_id: listing.seller_id,
            title: listing.title,
            sale_type: listing.sale_type,
            price: listing.price,
            current_bid: None,
            highest_bidder_id: None,
            total_bids: 0,
            shipping_cost: listing.shipping_cost,
            auction_end_time: listing.auction_end_time,
            is_active: true,
            created_at: Utc::now(),
        };
        tables.listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> AppResult<Option<Listing>> {
        let tables = self.tables.read().await;
        Ok(tables.listings.get(&id).cloned())
    }

    async fn try_apply_bid(
        &self,
        expected_current_bid: Option<i64>,
        bid: NewBid,
    ) -> AppResult<Option<Bid>> {
        let mut tables = self.tables.write().await;

        let listing = tables
            .listings
            .get_mut(&bid.listing_id)
            .ok_or_else(|| AppError::NotFound(format!("Listing {}", bid.listing_id)))?;

        // Compare-and-set on current_bid: a stale read loses the race
        if listing.current_bid != expected_current_bid {
            return Ok(None);
        }

        listing.current_bid = Some(bid.amount);
        listing.highest_bidder_id = Some(bid.user_id);
        listing.total_bids += 1;

        let bid = Bid {
            id: Uuid::new_v4(),
            listing_id: bid.listing_id,
            user_id: bid.user_id,
            amount: bid.amount,
            shipping_address_id: bid.shipping_address_id,
            created_at: Utc::now(),
        };
        tables.bids.insert(bid.id, bid.clone());

        Ok(Some(bid))
    }

    async fn extend_auction_end(
        &self,
        listing_id: Uuid,
        new_end: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let listing = tables
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| AppError::NotFound(format!("Listing {}", listing_id)))?;

        // Deadlines only move forward
        match listing.auction_end_time {
            Some(current) if current < new_end => {
                listing.auction_end_time = Some(new_end);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_active_auctions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Listing>> {
        let tables = self.tables.read().await;
        let listings = tables
            .listings
            .values()
            .filter(|l| {
                l.is_active
                    && l.sale_type == SaleType::Auction
                    && l.auction_end_time.map(|end| end < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(listings)
    }

    async fn close_listing(&self, listing_id: Uuid, final_bid: Option<i64>) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let listing = tables
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| AppError::NotFound(format!("Listing {}", listing_id)))?;
        listing.is_active = false;
        if final_bid.is_some() {
            listing.current_bid = final_bid;
        }
        Ok(())
    }

    async fn winning_bid_exposure(&self, user_id: Uuid) -> AppResult<i64> {
        let tables = self.tables.read().await;
        let exposure = tables
            .listings
            .values()
            .filter(|l| {
                l.is_active
                    && l.sale_type == SaleType::Auction
                    && l.highest_bidder_id == Some(user_id)
            })
            .map(|l| l.current_bid.unwrap_or(0))
            .sum();
        Ok(exposure)
    }

    async fn bids_for_listing(&self, listing_id: Uuid) -> AppResult<Vec<Bid>> {
        let tables = self.tables.read().await;
        let mut bids: Vec<Bid> = tables
            .bids
            .values()
            .filter(|b| b.listing_id == listing_id)
            .cloned()
            .collect();
        // Highest amount first; earliest wins among equal amounts
        bids.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(bids)
    }

    // ========== ORDERS ==========

    async fn create_order(&self, order: NewOrder) -> AppResult<Order> {
        let mut tables = self.tables.write().await;
        let order = Order {
            id: Uuid::new_v4(),
            listing_id: order.listing_id,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            amount: order.amount,
            status: order.status,
            delivery_address_id: order.delivery_address_id,
            settlement_blocked: false,
            no_answer_deadline: None,
            delivered_at: None,
            completed_at: None,
            cancelled_at: None,
            issue_reason: None,
            created_at: Utc::now(),
        };
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&id).cloned())
    }

    async fn set_order_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
    ) -> AppResult<bool> {
        OrderStatus::validate_transition(from, to)?;
        if from == to {
            return Ok(true);
        }

        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        if order.status != from {
            return Ok(false);
        }

        let now = Utc::now();
        order.status = to;
        match to {
            OrderStatus::PendingAcceptance => order.delivered_at = Some(now),
            OrderStatus::Completed => order.completed_at = Some(now),
            OrderStatus::Cancelled => order.cancelled_at = Some(now),
            _ => {}
        }
        if let Some(reason) = reason {
            order.issue_reason = Some(reason);
        }
        Ok(true)
    }

    async fn open_no_answer_window(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        deadline: DateTime<Utc>,
    ) -> AppResult<bool> {
        OrderStatus::validate_transition(from, OrderStatus::NoAnswerPending)?;

        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        if order.status != from {
            return Ok(false);
        }
        order.status = OrderStatus::NoAnswerPending;
        order.no_answer_deadline = Some(deadline);
        Ok(true)
    }

    async fn clear_no_answer_window(&self, order_id: Uuid) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        if order.status != OrderStatus::NoAnswerPending {
            return Ok(false);
        }
        order.status = OrderStatus::Pending;
        order.no_answer_deadline = None;
        Ok(true)
    }

    async fn block_order_settlement(&self, order_id: Uuid, reason: String) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        // The block flag always sticks, whatever state the order is in
        order.settlement_blocked = true;

        let transitioned =
            OrderStatus::validate_transition(order.status, OrderStatus::Refused).is_ok();
        if transitioned && order.status != OrderStatus::Refused {
            order.status = OrderStatus::Refused;
            order.issue_reason = Some(reason);
        }
        Ok(transitioned)
    }

    async fn expired_no_answer_orders(&self, now: DateTime<Utc>) -> AppResult<Vec<Order>> {
        let tables = self.tables.read().await;
        let orders = tables
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::NoAnswerPending
                    && o.no_answer_deadline.map(|d| d < now).unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(orders)
    }

    // ========== LEDGER ==========

    async fn insert_ledger_entries(
        &self,
        entries: Vec<NewLedgerEntry>,
    ) -> AppResult<Vec<LedgerEntry>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = LedgerEntry {
                id: Uuid::new_v4(),
                seller_id: entry.seller_id,
                order_id: entry.order_id,
                kind: entry.kind,
                amount: entry.amount,
                description: entry.description,
                status: entry.status,
                hold_until: entry.hold_until,
                available_at: entry.available_at,
                payout_id: None,
                created_at: now,
            };
            tables.entries.insert(entry.id, entry.clone());
            inserted.push(entry);
        }
        Ok(inserted)
    }

    async fn entries_for_order(&self, order_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<LedgerEntry> = tables
            .entries
            .values()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn entries_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<LedgerEntry> = tables
            .entries
            .values()
            .filter(|e| e.seller_id == seller_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn reverse_unpaid_entries(
        &self,
        order_id: Uuid,
    ) -> AppResult<(u64, Vec<LedgerEntry>)> {
        let mut tables = self.tables.write().await;
        let mut flipped = 0u64;
        let mut still_paid = Vec::new();

        for entry in tables.entries.values_mut() {
            if entry.order_id != order_id || entry.kind == EntryKind::Reversal {
                continue;
            }
            if entry.status == EntryStatus::Paid {
                still_paid.push(entry.clone());
            } else if EntryStatus::validate_transition(entry.status, EntryStatus::Reversed).is_ok()
            {
                entry.status = EntryStatus::Reversed;
                flipped += 1;
            }
        }

        still_paid.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok((flipped, still_paid))
    }

    async fn release_held_entries(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut tables = self.tables.write().await;
        let mut released = 0u64;
        for entry in tables.entries.values_mut() {
            if entry.status == EntryStatus::Pending
                && entry.hold_until.map(|h| h <= now).unwrap_or(false)
            {
                entry.status = EntryStatus::Available;
                entry.available_at = Some(now);
                released += 1;
            }
        }
        Ok(released)
    }

    async fn available_entries_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;
        let entries = tables
            .entries
            .values()
            .filter(|e| {
                e.status == EntryStatus::Available
                    && e.available_at
                        .map(|at| at >= start && at < end)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(entries)
    }

    // ========== MONTHLY QUOTAS ==========

    async fn get_or_create_monthly_quota(
        &self,
        seller_id: Uuid,
        month: i32,
        year: i32,
    ) -> AppResult<MonthlyQuota> {
        let mut tables = self.tables.write().await;
        if let Some(quota) = tables
            .quotas
            .values()
            .find(|q| q.seller_id == seller_id && q.month == month && q.year == year)
        {
            return Ok(quota.clone());
        }

        let quota = MonthlyQuota {
            id: Uuid::new_v4(),
            seller_id,
            month,
            year,
            sales_count: 0,
            free_sales_used: 0,
            commission_paid_sales: 0,
            total_commission_paid: 0,
        };
        tables.quotas.insert(quota.id, quota.clone());
        Ok(quota)
    }

    async fn update_monthly_quota(&self, quota: MonthlyQuota) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.quotas.insert(quota.id, quota);
        Ok(())
    }

    // ========== PAYOUTS ==========

    async fn create_weekly_payout(&self, payout: NewPayout) -> AppResult<(Payout, u64)> {
        let mut tables = self.tables.write().await;

        let matching: Vec<Uuid> = tables
            .entries
            .values()
            .filter(|e| {
                e.seller_id == payout.seller_id
                    && e.status == EntryStatus::Available
                    && e.available_at
                        .map(|at| at >= payout.week_start && at < payout.week_end)
                        .unwrap_or(false)
            })
            .map(|e| e.id)
            .collect();

        if matching.is_empty() {
            return Err(PayoutError::NothingAvailable {
                seller_id: payout.seller_id,
            }
            .into());
        }

        let payout = Payout {
            id: Uuid::new_v4(),
            seller_id: payout.seller_id,
            week_start: payout.week_start,
            week_end: payout.week_end,
            total_earnings: payout.total_earnings,
            total_commission: payout.total_commission,
            total_shipping: payout.total_shipping,
            total_returns: payout.total_returns,
            net_payout: payout.net_payout,
            status: PayoutStatus::Pending,
            paid_at: None,
            paid_by: None,
            payment_method: None,
            payment_reference: None,
            created_at: Utc::now(),
        };
        tables.payouts.insert(payout.id, payout.clone());

        let mut flipped = 0u64;
        for id in matching {
            if let Some(entry) = tables.entries.get_mut(&id) {
                entry.status = EntryStatus::Paid;
                entry.payout_id = Some(payout.id);
                flipped += 1;
            }
        }

        Ok((payout, flipped))
    }

    async fn get_payout(&self, id: Uuid) -> AppResult<Option<Payout>> {
        let tables = self.tables.read().await;
        Ok(tables.payouts.get(&id).cloned())
    }

    async fn mark_payout_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        method: String,
        reference: Option<String>,
    ) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let payout = tables
            .payouts
            .get_mut(&payout_id)
            .ok_or_else(|| AppError::NotFound(format!("Payout {}", payout_id)))?;

        if payout.status != PayoutStatus::Pending {
            return Ok(false);
        }
        payout.status = PayoutStatus::Paid;
        payout.paid_at = Some(Utc::now());
        payout.paid_by = Some(admin_id);
        payout.payment_method = Some(method);
        payout.payment_reference = reference;
        Ok(true)
    }

    async fn payouts_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<Payout>> {
        let tables = self.tables.read().await;
        let mut payouts: Vec<Payout> = tables
            .payouts
            .values()
            .filter(|p| p.seller_id == seller_id)
            .cloned()
            .collect();
        payouts.sort_by(|a, b| b.week_start.cmp(&a.week_start));
        Ok(payouts)
    }

    async fn pending_payouts(&self) -> AppResult<Vec<Payout>> {
        let tables = self.tables.read().await;
        let mut payouts: Vec<Payout> = tables
            .payouts
            .values()
            .filter(|p| p.status == PayoutStatus::Pending)
            .cloned()
            .collect();
        payouts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payouts)
    }

    // ========== DELIVERY ORDERS ==========

    async fn create_delivery_order(
        &self,
        delivery: NewDeliveryOrder,
    ) -> AppResult<DeliveryOrder> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let delivery = DeliveryOrder {
            id: Uuid::new_v4(),
            order_id: delivery.order_id,
            external_id: delivery.external_id,
            tracking_number: delivery.tracking_number,
            status: DeliveryStatus::Pending,
            cod_amount: delivery.cod_amount,
            shipping_cost: delivery.shipping_cost,
            driver_name: None,
            driver_phone: None,
            cash_collected: false,
            cash_collected_at: None,
            settlement_recorded: false,
            return_reason: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn get_delivery_by_external(
        &self,
        external_id: &str,
    ) -> AppResult<Option<DeliveryOrder>> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .values()
            .find(|d| d.external_id == external_id)
            .cloned())
    }

    async fn latest_delivery_for_order(
        &self,
        order_id: Uuid,
    ) -> AppResult<Option<DeliveryOrder>> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .values()
            .filter(|d| d.order_id == order_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn apply_courier_update(
        &self,
        delivery_id: Uuid,
        event: &CourierEvent,
    ) -> AppResult<DeliveryOrder> {
        let mut tables = self.tables.write().await;
        let delivery = tables
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("Delivery order {}", delivery_id)))?;

        let now = Utc::now();
        delivery.status = event.status;
        delivery.updated_at = now;
        if let Some(tracking) = &event.tracking_number {
            delivery.tracking_number = tracking.clone();
        }
        if let Some(name) = &event.driver_name {
            delivery.driver_name = Some(name.clone());
        }
        if let Some(phone) = &event.driver_phone {
            delivery.driver_phone = Some(phone.clone());
        }
        if let Some(reason) = &event.return_reason {
            delivery.return_reason = Some(reason.clone());
        }
        // Cash collection is only ever asserted, never retracted
        if event.cash_collected && !delivery.cash_collected {
            delivery.cash_collected = true;
            delivery.cash_collected_at = Some(now);
        }
        if event.status == DeliveryStatus::Delivered && delivery.delivered_at.is_none() {
            delivery.delivered_at = Some(now);
        }

        Ok(delivery.clone())
    }

    async fn mark_settlement_recorded(&self, delivery_id: Uuid) -> AppResult<bool> {
        let mut tables = self.tables.write().await;
        let delivery = tables
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("Delivery order {}", delivery_id)))?;

        if delivery.settlement_recorded {
            return Ok(false);
        }
        delivery.settlement_recorded = true;
        Ok(true)
    }

    async fn unmark_settlement_recorded(&self, delivery_id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let delivery = tables
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("Delivery order {}", delivery_id)))?;
        delivery.settlement_recorded = false;
        Ok(())
    }

    // ========== NOTIFICATIONS ==========

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> AppResult<Notification> {
        let mut tables = self.tables.write().await;
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            related_id: notification.related_id,
            created_at: Utc::now(),
        };
        tables
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn notifications_for_user(&self, user_id: Uuid) -> AppResult<Vec<Notification>> {
        let tables = self.tables.read().await;
        let mut notifications: Vec<Notification> = tables
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn auction(seller: Uuid, price: i64, ends_in: Duration) -> NewListing {
        NewListing {
            seller_id: seller,
            title: "Test listing".to_string(),
            sale_type: SaleType::Auction,
            price,
            shipping_cost: 5_000,
            auction_end_time: Some(Utc::now() + ends_in),
        }
    }

    #[tokio::test]
    async fn test_try_apply_bid_is_compare_and_set() {
        let store = MemoryStore::new();
        let seller = Uuid::new_v4();
        let listing = store
            .create_listing(auction(seller, 10_000, Duration::hours(1)))
            .await
            .unwrap();

        let first = NewBid {
            listing_id: listing.id,
            user_id: Uuid::new_v4(),
            amount: 10_000,
            shipping_address_id: Uuid::new_v4(),
        };
        let second = NewBid {
            listing_id: listing.id,
            user_id: Uuid::new_v4(),
            amount: 11_000,
            shipping_address_id: Uuid::new_v4(),
        };

        // Both raced against the same snapshot (no bids yet)
        let accepted = store.try_apply_bid(None, first).await.unwrap();
        assert!(accepted.is_some());

        // The second CAS sees a stale expectation and loses cleanly
        let rejected = store.try_apply_bid(None, second).await.unwrap();
        assert!(rejected.is_none());

        let listing = store.get_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(listing.current_bid, Some(10_000));
        assert_eq!(listing.total_bids, 1);
    }

    #[tokio::test]
    async fn test_extend_auction_end_never_moves_backward() {
        let store = MemoryStore::new();
        let listing = store
            .create_listing(auction(Uuid::new_v4(), 10_000, Duration::hours(1)))
            .await
            .unwrap();
        let original_end = listing.auction_end_time.unwrap();

        let extended = store
            .extend_auction_end(listing.id, original_end - Duration::minutes(30))
            .await
            .unwrap();
        assert!(!extended);

        let extended = store
            .extend_auction_end(listing.id, original_end + Duration::minutes(2))
            .await
            .unwrap();
        assert!(extended);

        let listing = store.get_listing(listing.id).await.unwrap().unwrap();
        assert_eq!(
            listing.auction_end_time.unwrap(),
            original_end + Duration::minutes(2)
        );
    }

    #[tokio::test]
    async fn test_set_order_status_rejects_invalid_transition() {
        let store = MemoryStore::new();
        let order = store
            .create_order(NewOrder {
                listing_id: Uuid::new_v4(),
                buyer_id: Uuid::new_v4(),
                seller_id: Uuid::new_v4(),
                amount: 50_000,
                status: OrderStatus::Completed,
                delivery_address_id: None,
            })
            .await
            .unwrap();

        let result = store
            .set_order_status(order.id, OrderStatus::Completed, OrderStatus::Processing, None)
            .await;
        assert!(result.is_err());

        // Lost-race CAS returns false instead of erroring
        let applied = store
            .set_order_status(
                order.id,
                OrderStatus::PendingAcceptance,
                OrderStatus::Completed,
                None,
            )
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_mark_settlement_recorded_claims_once() {
        let store = MemoryStore::new();
        let delivery = store
            .create_delivery_order(NewDeliveryOrder {
                order_id: Uuid::new_v4(),
                external_id: "SHP-1".to_string(),
                tracking_number: "TRK-1".to_string(),
                cod_amount: 50_000,
                shipping_cost: 5_000,
            })
            .await
            .unwrap();

        assert!(store.mark_settlement_recorded(delivery.id).await.unwrap());
        assert!(!store.mark_settlement_recorded(delivery.id).await.unwrap());

        store.unmark_settlement_recorded(delivery.id).await.unwrap();
        assert!(store.mark_settlement_recorded(delivery.id).await.unwrap());
    }
}
