use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::delivery::courier::CourierApi;
use crate::delivery::models::{
    CourierEvent, DeliveryOrder, DeliveryStatus, NewDeliveryOrder, ShipmentRequest,
};
use crate::error::{AppError, AppResult, DeliveryError};
use crate::ledger::LedgerEngine;
use crate::marketplace::models::{Order, OrderStatus};
use crate::notify::{NotificationKind, Notifier};
use crate::storage::MarketStore;

/// Delivery flow configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// How long a buyer may reschedule after a failed delivery attempt
    pub no_answer_window: Duration,
    /// Ordering ban applied when the window expires unused
    pub no_answer_ban: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            no_answer_window: Duration::hours(24),
            no_answer_ban: Duration::days(7),
        }
    }
}

/// Maps courier webhook events onto order state and gates the ledger.
///
/// The pending-funds gate is absolute: ledger entries are created only by
/// a `delivered` event that carries `cash_collected` in the same payload,
/// claimed at-most-once per shipment. Zero-on-refusal is equally absolute:
/// a refused order must end with exactly zero net financial effect for the
/// seller, and a failure to enforce that is propagated for retry instead
/// of being swallowed.
pub struct DeliveryService {
    store: Arc<dyn MarketStore>,
    ledger: Arc<LedgerEngine>,
    courier: Arc<dyn CourierApi>,
    notifier: Arc<Notifier>,
    config: DeliveryConfig,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        ledger: Arc<LedgerEngine>,
        courier: Arc<dyn CourierApi>,
        notifier: Arc<Notifier>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            courier,
            notifier,
            config,
        }
    }

    /// Book a shipment with the courier and record the delivery order
    pub async fn create_delivery_order(&self, order_id: Uuid) -> AppResult<DeliveryOrder> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;
        let listing = self
            .store
            .get_listing(order.listing_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Listing {}", order.listing_id)))?;

        let booking = self
            .courier
            .create_shipment(ShipmentRequest {
                order_id,
                item_description: listing.title.clone(),
                cod_amount: order.amount,
                shipping_cost: listing.shipping_cost,
            })
            .await?;

        let delivery = self
            .store
            .create_delivery_order(NewDeliveryOrder {
                order_id,
                external_id: booking.external_id,
                tracking_number: booking.tracking_number,
                cod_amount: order.amount,
                shipping_cost: listing.shipping_cost,
            })
            .await?;

        info!(
            "Delivery order {} created for order {} ({})",
            delivery.id, order_id, delivery.external_id
        );
        Ok(delivery)
    }

    /// Process one validated courier webhook event
    pub async fn process_webhook(&self, event: CourierEvent) -> AppResult<()> {
        info!(
            "Courier webhook for delivery {}: {}",
            event.delivery_id, event.status
        );

        let delivery = self
            .store
            .get_delivery_by_external(&event.delivery_id)
            .await?
            .ok_or_else(|| DeliveryError::DeliveryOrderNotFound(event.delivery_id.clone()))?;

        let delivery = self.store.apply_courier_update(delivery.id, &event).await?;

        let order = self
            .store
            .get_order(delivery.order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", delivery.order_id)))?;

        if event.is_no_answer() {
            return self.open_no_answer_window(&order).await;
        }

        match event.status {
            DeliveryStatus::Delivered => self.handle_delivered(&order, &delivery, &event).await,
            DeliveryStatus::Returned => {
                let reason = event
                    .return_reason
                    .clone()
                    .unwrap_or_else(|| "returned by customer".to_string());
                self.handle_return(&order, &reason).await
            }
            DeliveryStatus::CustomerRefused => {
                let reason = event
                    .return_reason
                    .clone()
                    .unwrap_or_else(|| "delivery refused by buyer".to_string());
                self.handle_refusal(&order, &reason).await
            }
            DeliveryStatus::Cancelled => {
                self.advance_order(
                    &order,
                    OrderStatus::Cancelled,
                    Some("delivery cancelled by courier".to_string()),
                )
                .await
            }
            DeliveryStatus::Pending | DeliveryStatus::Assigned => {
                self.advance_order(&order, OrderStatus::Pending, None).await
            }
            DeliveryStatus::PickedUp
            | DeliveryStatus::InTransit
            | DeliveryStatus::OutForDelivery => {
                self.advance_order(&order, OrderStatus::Processing, None).await
            }
        }
    }

    /// Courier-driven order progress. Invalid transitions from stale or
    /// out-of-order webhooks are logged and dropped, never errors - the
    /// courier is not a caller we can reject.
    async fn advance_order(
        &self,
        order: &Order,
        target: OrderStatus,
        reason: Option<String>,
    ) -> AppResult<()> {
        if order.status == target {
            return Ok(());
        }

        match OrderStatus::validate_transition(order.status, target) {
            Ok(()) => {
                let applied = self
                    .store
                    .set_order_status(order.id, order.status, target, reason)
                    .await?;
                if !applied {
                    warn!(
                        "Order {} changed concurrently, {} -> {} not applied",
                        order.id, order.status, target
                    );
                }
                Ok(())
            }
            Err(e) => {
                warn!("Ignoring courier transition for order {}: {}", order.id, e);
                Ok(())
            }
        }
    }

    async fn handle_delivered(
        &self,
        order: &Order,
        delivery: &DeliveryOrder,
        event: &CourierEvent,
    ) -> AppResult<()> {
        self.advance_order(order, OrderStatus::PendingAcceptance, None)
            .await?;

        // Pending-funds gate: no cash in hand, no ledger entries
        if !event.cash_collected {
            info!(
                "Delivery {} reported delivered without cash collection, no settlement",
                delivery.id
            );
            return Ok(());
        }

        if order.settlement_blocked || order.status == OrderStatus::Refused {
            warn!(
                "Order {} is settlement-blocked, delivered event creates nothing",
                order.id
            );
            return Ok(());
        }

        // At-most-once claim per shipment; redelivered webhooks no-op here
        if !self.store.mark_settlement_recorded(delivery.id).await? {
            info!(
                "Settlement already recorded for delivery {}, ignoring duplicate event",
                delivery.id
            );
            return Ok(());
        }

        match self
            .ledger
            .create_sale_settlement(order.seller_id, order.id, order.amount, delivery.shipping_cost)
            .await
        {
            Ok(settlement) => {
                info!(
                    "Settlement created for seller {} on order {}: net {} IQD",
                    order.seller_id, order.id, settlement.net_earnings
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.store.unmark_settlement_recorded(delivery.id).await {
                    error!(
                        "Failed to release settlement claim for delivery {}: {}",
                        delivery.id, rollback
                    );
                }
                Err(e)
            }
        }
    }

    async fn handle_return(&self, order: &Order, reason: &str) -> AppResult<()> {
        self.advance_order(order, OrderStatus::Returned, Some(reason.to_string()))
            .await?;
        self.ledger.reverse_settlement(order.id, reason).await
    }

    /// Zero-on-refusal. The block flag and terminal status commit first;
    /// the reversal then guarantees the seller's net effect is exactly
    /// zero. A reversal failure here is real financial leakage, so it is
    /// escalated and propagated - the courier will retry the webhook.
    async fn handle_refusal(&self, order: &Order, reason: &str) -> AppResult<()> {
        let transitioned = self
            .store
            .block_order_settlement(order.id, reason.to_string())
            .await?;
        if !transitioned {
            warn!(
                "Order {} was already terminal when the refusal arrived",
                order.id
            );
        }

        if let Err(e) = self.ledger.reverse_settlement(order.id, reason).await {
            error!(
                "financial incident: settlement reversal failed for refused order {}: {}",
                order.id, e
            );
            return Err(e);
        }

        info!("Order {} refused by buyer, seller net effect is zero", order.id);
        Ok(())
    }

    async fn open_no_answer_window(&self, order: &Order) -> AppResult<()> {
        if order.status == OrderStatus::NoAnswerPending {
            return Ok(());
        }

        match OrderStatus::validate_transition(order.status, OrderStatus::NoAnswerPending) {
            Ok(()) => {
                let deadline = Utc::now() + self.config.no_answer_window;
                let applied = self
                    .store
                    .open_no_answer_window(order.id, order.status, deadline)
                    .await?;
                if applied {
                    info!(
                        "Opened reschedule window for order {} until {}",
                        order.id, deadline
                    );
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Ignoring no-answer report for order {} in state {}: {}",
                    order.id, order.status, e
                );
                Ok(())
            }
        }
    }

    /// Buyer asked for another attempt inside the window: book a fresh
    /// shipment and put the order back in flight
    pub async fn reschedule_delivery(&self, order_id: Uuid) -> AppResult<DeliveryOrder> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        if order.status != OrderStatus::NoAnswerPending {
            return Err(DeliveryError::NoRescheduleWindow.into());
        }
        let deadline = order
            .no_answer_deadline
            .ok_or(DeliveryError::NoRescheduleWindow)?;
        if Utc::now() > deadline {
            return Err(DeliveryError::RescheduleWindowExpired.into());
        }

        let delivery = self.create_delivery_order(order_id).await?;

        let applied = self.store.clear_no_answer_window(order_id).await?;
        if !applied {
            warn!(
                "Order {} left no_answer_pending while rescheduling",
                order_id
            );
        }

        self.notifier
            .notify(order.buyer_id, NotificationKind::DeliveryRescheduled, Some(order_id))
            .await;

        info!("Order {} rescheduled onto delivery {}", order_id, delivery.id);
        Ok(delivery)
    }

    /// Periodic sweep: cancel orders whose reschedule window expired
    /// unused, reverse anything settled, and ban the buyer from ordering.
    /// One failed order never blocks the rest of the sweep.
    pub async fn process_expired_no_answer_windows(&self) -> AppResult<u64> {
        let now = Utc::now();
        let expired = self.store.expired_no_answer_orders(now).await?;
        let mut cancelled = 0u64;

        for order in expired {
            let applied = match self
                .store
                .set_order_status(
                    order.id,
                    OrderStatus::NoAnswerPending,
                    OrderStatus::Cancelled,
                    Some("no-answer window expired".to_string()),
                )
                .await
            {
                Ok(applied) => applied,
                Err(e) => {
                    error!("Failed to cancel no-answer order {}: {}", order.id, e);
                    continue;
                }
            };
            if !applied {
                // A reschedule won the race
                continue;
            }

            if let Err(e) = self
                .ledger
                .reverse_settlement(order.id, "order cancelled after missed delivery")
                .await
            {
                error!(
                    "financial incident: settlement reversal failed for cancelled order {}: {}",
                    order.id, e
                );
            }

            if let Err(e) = self
                .store
                .apply_order_ban(order.buyer_id, now + self.config.no_answer_ban)
                .await
            {
                error!("Failed to ban buyer {} from ordering: {}", order.buyer_id, e);
            }

            self.notifier
                .notify(
                    order.buyer_id,
                    NotificationKind::OrderCancelledNoAnswer,
                    Some(order.id),
                )
                .await;

            info!(
                "Order {} auto-cancelled: reschedule window expired for buyer {}",
                order.id, order.buyer_id
            );
            cancelled += 1;
        }

        Ok(cancelled)
    }

    /// Buyer confirmed they accepted the delivered item
    pub async fn confirm_delivery_acceptance(&self, order_id: Uuid) -> AppResult<()> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        let delivery = self
            .store
            .latest_delivery_for_order(order_id)
            .await?
            .ok_or(DeliveryError::NotDelivered)?;
        if delivery.status != DeliveryStatus::Delivered {
            return Err(DeliveryError::NotDelivered.into());
        }

        let applied = self
            .store
            .set_order_status(
                order.id,
                OrderStatus::PendingAcceptance,
                OrderStatus::Completed,
                None,
            )
            .await?;
        if !applied {
            return Err(DeliveryError::InvalidOrderTransition {
                from: order.status,
                to: OrderStatus::Completed,
            }
            .into());
        }

        info!("Buyer accepted delivery for order {}", order_id);
        Ok(())
    }

    /// The order's current shipment, if one was booked
    pub async fn delivery_for_order(&self, order_id: Uuid) -> AppResult<Option<DeliveryOrder>> {
        self.store.latest_delivery_for_order(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::models::ShipmentBooking;
    use crate::ledger::models::EntryStatus;
    use crate::ledger::LedgerConfig;
    use crate::marketplace::models::{NewListing, NewOrder, NewUser, SaleType};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeCourier {
        bookings: AtomicU32,
    }

    #[async_trait]
    impl CourierApi for FakeCourier {
        async fn create_shipment(&self, _request: ShipmentRequest) -> AppResult<ShipmentBooking> {
            let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ShipmentBooking {
                external_id: format!("SHP-{}", n),
                tracking_number: format!("TRK-{}", n),
            })
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        service: DeliveryService,
        ledger: Arc<LedgerEngine>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn MarketStore> = store.clone();
        let ledger = Arc::new(LedgerEngine::new(dyn_store.clone(), LedgerConfig::default()));
        let notifier = Arc::new(Notifier::new(dyn_store.clone(), None));
        let courier = Arc::new(FakeCourier {
            bookings: AtomicU32::new(0),
        });
        let service = DeliveryService::new(
            dyn_store,
            ledger.clone(),
            courier,
            notifier,
            DeliveryConfig::default(),
        );
        Harness {
            store,
            service,
            ledger,
        }
    }

    /// Seller, buyer, listing (5k shipping) and a processing order at 100k
    async fn seed_order(h: &Harness) -> (Uuid, Uuid, Uuid) {
        let seller = h
            .store
            .create_user(NewUser {
                display_name: "seller".to_string(),
                phone: "07700000001".to_string(),
                phone_verified: true,
                is_banned: false,
                bidding_limit: 100_000,
            })
            .await
            .unwrap()
            .id;
        let buyer = h
            .store
            .create_user(NewUser {
                display_name: "buyer".to_string(),
                phone: "07700000002".to_string(),
                phone_verified: true,
                is_banned: false,
                bidding_limit: 100_000,
            })
            .await
            .unwrap()
            .id;
        let listing = h
            .store
            .create_listing(NewListing {
                seller_id: seller,
                title: "Hand-carved chessboard".to_string(),
                sale_type: SaleType::Auction,
                price: 80_000,
                shipping_cost: 5_000,
                auction_end_time: Some(Utc::now()),
            })
            .await
            .unwrap()
            .id;
        let order = h
            .store
            .create_order(NewOrder {
                listing_id: listing,
                buyer_id: buyer,
                seller_id: seller,
                amount: 100_000,
                status: OrderStatus::Processing,
                delivery_address_id: Some(Uuid::new_v4()),
            })
            .await
            .unwrap()
            .id;
        (order, seller, buyer)
    }

    fn event(delivery_id: &str, status: DeliveryStatus, cash: bool) -> CourierEvent {
        CourierEvent {
            delivery_id: delivery_id.to_string(),
            tracking_number: None,
            status,
            status_message: None,
            latitude: None,
            longitude: None,
            driver_name: Some("Karim".to_string()),
            driver_phone: None,
            driver_notes: None,
            photo_url: None,
            cash_collected: cash,
            return_reason: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Net effect of an order across the buckets money can still live in
    async fn order_net(h: &Harness, order: Uuid) -> i64 {
        h.store
            .entries_for_order(order)
            .await
            .unwrap()
            .iter()
            .filter(|e| e.status != EntryStatus::Reversed)
            .map(|e| e.amount)
            .sum()
    }

    #[tokio::test]
    async fn test_delivered_with_cash_creates_settlement() {
        let h = harness();
        let (order, seller, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        h.service
            .process_webhook(event(&delivery.external_id, DeliveryStatus::Delivered, true))
            .await
            .unwrap();

        let entries = h.store.entries_for_order(order).await.unwrap();
        assert_eq!(entries.len(), 2); // earning + shipping deduction, free sale

        let balance = h.ledger.get_wallet_balance(seller).await.unwrap();
        assert_eq!(balance.pending, 95_000);

        let order = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PendingAcceptance);
        assert!(order.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_shipping_progress_alone_never_settles() {
        let h = harness();
        let (order, _, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        for status in [
            DeliveryStatus::Assigned,
            DeliveryStatus::PickedUp,
            DeliveryStatus::InTransit,
            DeliveryStatus::OutForDelivery,
        ] {
            h.service
                .process_webhook(event(&delivery.external_id, status, false))
                .await
                .unwrap();
        }

        assert!(h.store.entries_for_order(order).await.unwrap().is_empty());
        let order = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_delivered_without_cash_defers_settlement() {
        let h = harness();
        let (order, _, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        h.service
            .process_webhook(event(&delivery.external_id, DeliveryStatus::Delivered, false))
            .await
            .unwrap();

        assert!(h.store.entries_for_order(order).await.unwrap().is_empty());
        let order = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PendingAcceptance);
    }

    #[tokio::test]
    async fn test_redelivered_webhook_settles_once() {
        let h = harness();
        let (order, _, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        let delivered = event(&delivery.external_id, DeliveryStatus::Delivered, true);
        h.service.process_webhook(delivered.clone()).await.unwrap();
        h.service.process_webhook(delivered).await.unwrap();

        assert_eq!(h.store.entries_for_order(order).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_return_reverses_settlement() {
        let h = harness();
        let (order, seller, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        h.service
            .process_webhook(event(&delivery.external_id, DeliveryStatus::Delivered, true))
            .await
            .unwrap();

        let mut returned = event(&delivery.external_id, DeliveryStatus::Returned, false);
        returned.return_reason = Some("damaged on arrival".to_string());
        h.service.process_webhook(returned).await.unwrap();

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order_row.status, OrderStatus::Returned);

        let entries = h.store.entries_for_order(order).await.unwrap();
        assert!(entries.iter().all(|e| e.status == EntryStatus::Reversed));

        let balance = h.ledger.get_wallet_balance(seller).await.unwrap();
        assert_eq!(balance.total, 0);
    }

    #[tokio::test]
    async fn test_refusal_before_settlement_blocks_forever() {
        let h = harness();
        let (order, seller, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        let mut refused = event(&delivery.external_id, DeliveryStatus::CustomerRefused, false);
        refused.return_reason = Some("buyer refused at the door".to_string());
        h.service.process_webhook(refused).await.unwrap();

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order_row.status, OrderStatus::Refused);
        assert!(order_row.settlement_blocked);

        // A confused late "delivered + cash" event must create nothing
        h.service
            .process_webhook(event(&delivery.external_id, DeliveryStatus::Delivered, true))
            .await
            .unwrap();

        assert!(h.store.entries_for_order(order).await.unwrap().is_empty());
        assert_eq!(order_net(&h, order).await, 0);
        let balance = h.ledger.get_wallet_balance(seller).await.unwrap();
        assert_eq!(balance.total, 0);
    }

    #[tokio::test]
    async fn test_refusal_after_settlement_nets_to_zero() {
        let h = harness();
        let (order, _, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        h.service
            .process_webhook(event(&delivery.external_id, DeliveryStatus::Delivered, true))
            .await
            .unwrap();
        assert_eq!(order_net(&h, order).await, 95_000);

        let refused = event(&delivery.external_id, DeliveryStatus::CustomerRefused, false);
        h.service.process_webhook(refused).await.unwrap();

        // Whatever the delivery history was, the order contributes zero
        assert_eq!(order_net(&h, order).await, 0);
    }

    #[tokio::test]
    async fn test_no_answer_opens_window_and_reschedule_rebooks() {
        let h = harness();
        let (order, _, buyer) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        let mut no_answer = event(&delivery.external_id, DeliveryStatus::OutForDelivery, false);
        no_answer.status_message = Some("no_answer".to_string());
        h.service.process_webhook(no_answer).await.unwrap();

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order_row.status, OrderStatus::NoAnswerPending);
        let deadline = order_row.no_answer_deadline.unwrap();
        assert!(deadline > Utc::now() + Duration::hours(23));
        assert!(deadline <= Utc::now() + Duration::hours(24));

        let second = h.service.reschedule_delivery(order).await.unwrap();
        assert_ne!(second.external_id, delivery.external_id);

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order_row.status, OrderStatus::Pending);
        assert!(order_row.no_answer_deadline.is_none());

        let to_buyer = h.store.notifications_for_user(buyer).await.unwrap();
        assert!(to_buyer.iter().any(|n| n.kind == "delivery_rescheduled"));
    }

    #[tokio::test]
    async fn test_expired_window_sweep_cancels_reverses_and_bans() {
        let h = harness();
        let (order, seller, buyer) = seed_order(&h).await;
        h.service.create_delivery_order(order).await.unwrap();

        // Settle directly so the sweep has something to claw back, with
        // the order still in flight
        h.ledger
            .create_sale_settlement(seller, order, 100_000, 5_000)
            .await
            .unwrap();
        assert_eq!(order_net(&h, order).await, 95_000);

        // Window already expired in the past
        h.store
            .open_no_answer_window(order, OrderStatus::Processing, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(h.service.process_expired_no_answer_windows().await.unwrap(), 1);

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order_row.status, OrderStatus::Cancelled);
        assert!(order_row.cancelled_at.is_some());
        assert_eq!(order_net(&h, order).await, 0);

        let buyer_row = h.store.get_user(buyer).await.unwrap().unwrap();
        assert_eq!(buyer_row.no_answer_count, 1);
        let ban_until = buyer_row.order_ban_until.unwrap();
        assert!(ban_until > Utc::now() + Duration::days(6));
        assert!(ban_until <= Utc::now() + Duration::days(7));

        let to_buyer = h.store.notifications_for_user(buyer).await.unwrap();
        assert!(to_buyer
            .iter()
            .any(|n| n.kind == "order_cancelled_no_answer"));

        // Nothing left for a second sweep
        assert_eq!(h.service.process_expired_no_answer_windows().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reschedule_outside_window_is_rejected() {
        let h = harness();
        let (order, _, _) = seed_order(&h).await;
        h.service.create_delivery_order(order).await.unwrap();

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        h.store
            .open_no_answer_window(order, order_row.status, Utc::now() - Duration::minutes(5))
            .await
            .unwrap();

        let err = h.service.reschedule_delivery(order).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Delivery(DeliveryError::RescheduleWindowExpired)
        ));

        // And an order with no window at all
        let (plain, _, _) = seed_order(&h).await;
        let err = h.service.reschedule_delivery(plain).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Delivery(DeliveryError::NoRescheduleWindow)
        ));
    }

    #[tokio::test]
    async fn test_unknown_delivery_id_is_an_error() {
        let h = harness();
        let err = h
            .service
            .process_webhook(event("SHP-missing", DeliveryStatus::Delivered, true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Delivery(DeliveryError::DeliveryOrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_buyer_acceptance_completes_order() {
        let h = harness();
        let (order, _, _) = seed_order(&h).await;
        let delivery = h.service.create_delivery_order(order).await.unwrap();

        // Not delivered yet
        let err = h.service.confirm_delivery_acceptance(order).await.unwrap_err();
        assert!(matches!(err, AppError::Delivery(DeliveryError::NotDelivered)));

        h.service
            .process_webhook(event(&delivery.external_id, DeliveryStatus::Delivered, true))
            .await
            .unwrap();
        h.service.confirm_delivery_acceptance(order).await.unwrap();

        let order_row = h.store.get_order(order).await.unwrap().unwrap();
        assert_eq!(order_row.status, OrderStatus::Completed);
        assert!(order_row.completed_at.is_some());
    }
}
