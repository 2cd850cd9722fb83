use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::delivery::models::{CourierEvent, DeliveryOrder, NewDeliveryOrder};
use crate::error::{AppResult, PayoutError};
use crate::ledger::models::{
    LedgerEntry, MonthlyQuota, NewLedgerEntry, NewPayout, Payout, PayoutStatus,
};
use crate::marketplace::models::{
    Bid, Listing, NewBid, NewListing, NewOrder, NewUser, Order, OrderStatus, SaleType, User,
};
use crate::notify::{NewNotification, Notification};
use crate::storage::MarketStore;

/// Postgres-backed store.
///
/// Every state transition is a status-filtered conditional UPDATE checked
/// through `rows_affected()`, so racing writers serialize at the database
/// row instead of clobbering each other.
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketStore for PgStore {
    // ========== USERS ==========

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (display_name, phone, phone_verified, is_banned, bidding_limit)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user.display_name)
        .bind(user.phone)
        .bind(user.phone_verified)
        .bind(user.is_banned)
        .bind(user.bidding_limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn apply_order_ban(&self, user_id: Uuid, until: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET no_answer_count = no_answer_count + 1, order_ban_until = $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========== LISTINGS & BIDS ==========

    async fn create_listing(&self, listing: NewListing) -> AppResult<Listing> {
        let listing = sqlx::query_as::<_, Listing>(
            r#"
            INSERT INTO listings (seller_id, title, sale_type, price, shipping_cost, auction_end_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(listing.seller_id)
        .bind(listing.title)
        .bind(listing.sale_type)
        .bind(listing.price)
        .bind(listing.shipping_cost)
        .bind(listing.auction_end_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> AppResult<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(listing)
    }

    async fn try_apply_bid(
        &self,
        expected_current_bid: Option<i64>,
        bid: NewBid,
    ) -> AppResult<Option<Bid>> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-set on current_bid: the accepted bid is whichever
        // writer still sees the snapshot it validated against
        let updated = sqlx::query(
            r#"
            UPDATE listings
            SET current_bid = $2, highest_bidder_id = $3, total_bids = total_bids + 1
            WHERE id = $1 AND current_bid IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(bid.listing_id)
        .bind(bid.amount)
        .bind(bid.user_id)
        .bind(expected_current_bid)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let bid = sqlx::query_as::<_, Bid>(
            r#"
            INSERT INTO bids (listing_id, user_id, amount, shipping_address_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(bid.listing_id)
        .bind(bid.user_id)
        .bind(bid.amount)
        .bind(bid.shipping_address_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(bid))
    }

    async fn extend_auction_end(
        &self,
        listing_id: Uuid,
        new_end: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET auction_end_time = $2
            WHERE id = $1 AND auction_end_time IS NOT NULL AND auction_end_time < $2
            "#,
        )
        .bind(listing_id)
        .bind(new_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_active_auctions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Listing>> {
        let listings = sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM listings
            WHERE is_active = TRUE
              AND sale_type = $1
              AND auction_end_time IS NOT NULL
              AND auction_end_time < $2
            "#,
        )
        .bind(SaleType::Auction)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(listings)
    }

    async fn close_listing(&self, listing_id: Uuid, final_bid: Option<i64>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE listings
            SET is_active = FALSE, current_bid = COALESCE($2, current_bid)
            WHERE id = $1
            "#,
        )
        .bind(listing_id)
        .bind(final_bid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn winning_bid_exposure(&self, user_id: Uuid) -> AppResult<i64> {
        let exposure: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(current_bid)::BIGINT FROM listings
            WHERE is_active = TRUE AND sale_type = $1 AND highest_bidder_id = $2
            "#,
        )
        .bind(SaleType::Auction)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exposure.unwrap_or(0))
    }

    async fn bids_for_listing(&self, listing_id: Uuid) -> AppResult<Vec<Bid>> {
        let bids = sqlx::query_as::<_, Bid>(
            r#"
            SELECT * FROM bids
            WHERE listing_id = $1
            ORDER BY amount DESC, created_at ASC, id ASC
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bids)
    }

    // ========== ORDERS ==========

    async fn create_order(&self, order: NewOrder) -> AppResult<Order> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (listing_id, buyer_id, seller_id, amount, status, delivery_address_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(order.listing_id)
        .bind(order.buyer_id)
        .bind(order.seller_id)
        .bind(order.amount)
        .bind(order.status)
        .bind(order.delivery_address_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> AppResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
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

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3,
                delivered_at = CASE WHEN $3 = 'pending_acceptance'::order_status THEN NOW() ELSE delivered_at END,
                completed_at = CASE WHEN $3 = 'completed'::order_status THEN NOW() ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled'::order_status THEN NOW() ELSE cancelled_at END,
                issue_reason = COALESCE($4, issue_reason)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id)
        .bind(from)
        .bind(to)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn open_no_answer_window(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        deadline: DateTime<Utc>,
    ) -> AppResult<bool> {
        OrderStatus::validate_transition(from, OrderStatus::NoAnswerPending)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, no_answer_deadline = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id)
        .bind(from)
        .bind(OrderStatus::NoAnswerPending)
        .bind(deadline)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_no_answer_window(&self, order_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, no_answer_deadline = NULL
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(order_id)
        .bind(OrderStatus::Pending)
        .bind(OrderStatus::NoAnswerPending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn block_order_settlement(&self, order_id: Uuid, reason: String) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let current: OrderStatus = sqlx::query_scalar(
            "SELECT status FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        // The block flag always sticks, whatever state the order is in
        sqlx::query("UPDATE orders SET settlement_blocked = TRUE WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        let transitioned =
            OrderStatus::validate_transition(current, OrderStatus::Refused).is_ok();
        if transitioned && current != OrderStatus::Refused {
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, issue_reason = $3
                WHERE id = $1
                "#,
            )
            .bind(order_id)
            .bind(OrderStatus::Refused)
            .bind(reason)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(transitioned)
    }

    async fn expired_no_answer_orders(&self, now: DateTime<Utc>) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE status = $1 AND no_answer_deadline IS NOT NULL AND no_answer_deadline < $2
            "#,
        )
        .bind(OrderStatus::NoAnswerPending)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    // ========== LEDGER ==========

    async fn insert_ledger_entries(
        &self,
        entries: Vec<NewLedgerEntry>,
    ) -> AppResult<Vec<LedgerEntry>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(entries.len());

        for entry in entries {
            let entry = sqlx::query_as::<_, LedgerEntry>(
                r#"
                INSERT INTO ledger_entries
                    (seller_id, order_id, kind, amount, description, status, hold_until, available_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
                "#,
            )
            .bind(entry.seller_id)
            .bind(entry.order_id)
            .bind(entry.kind)
            .bind(entry.amount)
            .bind(entry.description)
            .bind(entry.status)
            .bind(entry.hold_until)
            .bind(entry.available_at)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(entry);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn entries_for_order(&self, order_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn entries_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE seller_id = $1 ORDER BY created_at DESC, id ASC",
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn reverse_unpaid_entries(
        &self,
        order_id: Uuid,
    ) -> AppResult<(u64, Vec<LedgerEntry>)> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET status = 'reversed'
            WHERE order_id = $1 AND kind != 'reversal' AND status IN ('pending', 'available')
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        let still_paid = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM ledger_entries
            WHERE order_id = $1 AND kind != 'reversal' AND status = 'paid'
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((flipped.rows_affected(), still_paid))
    }

    async fn release_held_entries(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET status = 'available', available_at = $1
            WHERE status = 'pending' AND hold_until IS NOT NULL AND hold_until <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn available_entries_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM ledger_entries
            WHERE status = 'available' AND available_at >= $1 AND available_at < $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    // ========== MONTHLY QUOTAS ==========

    async fn get_or_create_monthly_quota(
        &self,
        seller_id: Uuid,
        month: i32,
        year: i32,
    ) -> AppResult<MonthlyQuota> {
        sqlx::query(
            r#"
            INSERT INTO monthly_quotas (seller_id, month, year)
            VALUES ($1, $2, $3)
            ON CONFLICT (seller_id, month, year) DO NOTHING
            "#,
        )
        .bind(seller_id)
        .bind(month)
        .bind(year)
        .execute(&self.pool)
        .await?;

        let quota = sqlx::query_as::<_, MonthlyQuota>(
            "SELECT * FROM monthly_quotas WHERE seller_id = $1 AND month = $2 AND year = $3",
        )
        .bind(seller_id)
        .bind(month)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        Ok(quota)
    }

    async fn update_monthly_quota(&self, quota: MonthlyQuota) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE monthly_quotas
            SET sales_count = $2, free_sales_used = $3, commission_paid_sales = $4,
                total_commission_paid = $5
            WHERE id = $1
            "#,
        )
        .bind(quota.id)
        .bind(quota.sales_count)
        .bind(quota.free_sales_used)
        .bind(quota.commission_paid_sales)
        .bind(quota.total_commission_paid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========== PAYOUTS ==========

    async fn create_weekly_payout(&self, payout: NewPayout) -> AppResult<(Payout, u64)> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Payout>(
            r#"
            INSERT INTO payouts
                (seller_id, week_start, week_end, total_earnings, total_commission,
                 total_shipping, total_returns, net_payout, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(payout.seller_id)
        .bind(payout.week_start)
        .bind(payout.week_end)
        .bind(payout.total_earnings)
        .bind(payout.total_commission)
        .bind(payout.total_shipping)
        .bind(payout.total_returns)
        .bind(payout.net_payout)
        .bind(PayoutStatus::Pending)
        .fetch_one(&mut *tx)
        .await?;

        let flipped = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET status = 'paid', payout_id = $1
            WHERE seller_id = $2 AND status = 'available'
              AND available_at >= $3 AND available_at < $4
            "#,
        )
        .bind(inserted.id)
        .bind(payout.seller_id)
        .bind(payout.week_start)
        .bind(payout.week_end)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(PayoutError::NothingAvailable {
                seller_id: payout.seller_id,
            }
            .into());
        }

        tx.commit().await?;
        Ok((inserted, flipped.rows_affected()))
    }

    async fn get_payout(&self, id: Uuid) -> AppResult<Option<Payout>> {
        let payout = sqlx::query_as::<_, Payout>("SELECT * FROM payouts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payout)
    }

    async fn mark_payout_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        method: String,
        reference: Option<String>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = $2, paid_at = NOW(), paid_by = $3, payment_method = $4,
                payment_reference = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(payout_id)
        .bind(PayoutStatus::Paid)
        .bind(admin_id)
        .bind(method)
        .bind(reference)
        .bind(PayoutStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn payouts_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<Payout>> {
        let payouts = sqlx::query_as::<_, Payout>(
            "SELECT * FROM payouts WHERE seller_id = $1 ORDER BY week_start DESC",
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payouts)
    }

    async fn pending_payouts(&self) -> AppResult<Vec<Payout>> {
        let payouts = sqlx::query_as::<_, Payout>(
            "SELECT * FROM payouts WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(PayoutStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        Ok(payouts)
    }

    // ========== DELIVERY ORDERS ==========

    async fn create_delivery_order(
        &self,
        delivery: NewDeliveryOrder,
    ) -> AppResult<DeliveryOrder> {
        let delivery = sqlx::query_as::<_, DeliveryOrder>(
            r#"
            INSERT INTO delivery_orders (order_id, external_id, tracking_number, cod_amount, shipping_cost)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(delivery.order_id)
        .bind(delivery.external_id)
        .bind(delivery.tracking_number)
        .bind(delivery.cod_amount)
        .bind(delivery.shipping_cost)
        .fetch_one(&self.pool)
        .await?;

        Ok(delivery)
    }

    async fn get_delivery_by_external(
        &self,
        external_id: &str,
    ) -> AppResult<Option<DeliveryOrder>> {
        let delivery = sqlx::query_as::<_, DeliveryOrder>(
            "SELECT * FROM delivery_orders WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(delivery)
    }

    async fn latest_delivery_for_order(
        &self,
        order_id: Uuid,
    ) -> AppResult<Option<DeliveryOrder>> {
        let delivery = sqlx::query_as::<_, DeliveryOrder>(
            r#"
            SELECT * FROM delivery_orders
            WHERE order_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(delivery)
    }

    async fn apply_courier_update(
        &self,
        delivery_id: Uuid,
        event: &CourierEvent,
    ) -> AppResult<DeliveryOrder> {
        let delivery = sqlx::query_as::<_, DeliveryOrder>(
            r#"
            UPDATE delivery_orders
            SET status = $2,
                tracking_number = COALESCE($3, tracking_number),
                driver_name = COALESCE($4, driver_name),
                driver_phone = COALESCE($5, driver_phone),
                return_reason = COALESCE($6, return_reason),
                cash_collected_at = CASE WHEN $7 AND NOT cash_collected THEN NOW() ELSE cash_collected_at END,
                cash_collected = cash_collected OR $7,
                delivered_at = CASE WHEN $2 = 'delivered'::delivery_status AND delivered_at IS NULL THEN NOW() ELSE delivered_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(delivery_id)
        .bind(event.status)
        .bind(event.tracking_number.as_deref())
        .bind(event.driver_name.as_deref())
        .bind(event.driver_phone.as_deref())
        .bind(event.return_reason.as_deref())
        .bind(event.cash_collected)
        .fetch_one(&self.pool)
        .await?;

        Ok(delivery)
    }

    async fn mark_settlement_recorded(&self, delivery_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_orders
            SET settlement_recorded = TRUE
            WHERE id = $1 AND settlement_recorded = FALSE
            "#,
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unmark_settlement_recorded(&self, delivery_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE delivery_orders SET settlement_recorded = FALSE WHERE id = $1")
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========== NOTIFICATIONS ==========

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> AppResult<Notification> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (user_id, kind, title, message, related_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(notification.user_id)
        .bind(notification.kind)
        .bind(notification.title)
        .bind(notification.message)
        .bind(notification.related_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn notifications_for_user(&self, user_id: Uuid) -> AppResult<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }
}
