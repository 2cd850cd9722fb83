use chrono::{Datelike, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::{
    EntryKind, EntryStatus, LedgerEntry, MonthlyQuota, NewLedgerEntry, SettlementResult,
    WalletBalance,
};
use crate::storage::MarketStore;

/// Settlement policy configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Commission rate charged once the monthly free-sale quota is used up
    pub commission_rate: Decimal,
    /// Sales per seller per calendar month exempt from commission
    pub free_sales_per_month: i32,
    /// Hold before earned funds become payable, absorbing returns/refusals
    pub hold_period: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            commission_rate: dec!(0.08),
            free_sales_per_month: 15,
            hold_period: Duration::hours(48),
        }
    }
}

/// Computes and stores signed settlement entries per seller.
///
/// The ledger is append-only and owned exclusively by this engine: no
/// other component writes entry, quota or payout rows directly.
pub struct LedgerEngine {
    store: Arc<dyn MarketStore>,
    config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn MarketStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    fn commission_for(&self, sale_amount: i64) -> i64 {
        (Decimal::from(sale_amount) * self.config.commission_rate)
            .floor()
            .to_i64()
            .unwrap_or(0)
    }

    fn compute(
        &self,
        quota: &MonthlyQuota,
        sale_amount: i64,
        shipping_cost: i64,
    ) -> SettlementResult {
        let commission_free = quota.free_sales_used < self.config.free_sales_per_month;
        let commission_fee = if commission_free {
            0
        } else {
            self.commission_for(sale_amount)
        };

        SettlementResult {
            gross_earnings: sale_amount,
            commission_fee,
            shipping_deduction: shipping_cost,
            net_earnings: sale_amount - commission_fee - shipping_cost,
            commission_free,
            free_sales_remaining: (self.config.free_sales_per_month - quota.free_sales_used - 1)
                .max(0),
        }
    }

    /// Preview the settlement for a sale without writing anything
    pub async fn calculate_settlement(
        &self,
        seller_id: Uuid,
        sale_amount: i64,
        shipping_cost: i64,
    ) -> AppResult<SettlementResult> {
        let quota = self.current_month_quota(seller_id).await?;
        Ok(self.compute(&quota, sale_amount, shipping_cost))
    }

    /// Record the settlement for a collected sale.
    ///
    /// Writes, as one atomic group: an earning entry of +sale_amount, a
    /// commission entry when one is charged and a shipping deduction when
    /// shipping costs exist - all pending under the 48h hold - then bumps
    /// the seller's monthly quota counters.
    ///
    /// Callers must invoke this at most once per order; the delivery
    /// trigger guards that with its settlement-recorded claim.
    pub async fn create_sale_settlement(
        &self,
        seller_id: Uuid,
        order_id: Uuid,
        sale_amount: i64,
        shipping_cost: i64,
    ) -> AppResult<SettlementResult> {
        let now = Utc::now();
        let mut quota = self.current_month_quota(seller_id).await?;
        let settlement = self.compute(&quota, sale_amount, shipping_cost);

        let hold_until = Some(now + self.config.hold_period);
        let order_ref = short_ref(order_id);

        let mut entries = vec![NewLedgerEntry {
            seller_id,
            order_id,
            kind: EntryKind::Earning,
            amount: settlement.gross_earnings,
            description: format!("Sale proceeds - order #{}", order_ref),
            status: EntryStatus::Pending,
            hold_until,
            available_at: None,
        }];

        if settlement.commission_fee > 0 {
            entries.push(NewLedgerEntry {
                seller_id,
                order_id,
                kind: EntryKind::Commission,
                amount: -settlement.commission_fee,
                description: format!("Commission - order #{}", order_ref),
                status: EntryStatus::Pending,
                hold_until,
                available_at: None,
            });
        }

        if settlement.shipping_deduction > 0 {
            entries.push(NewLedgerEntry {
                seller_id,
                order_id,
                kind: EntryKind::ShippingDeduction,
                amount: -settlement.shipping_deduction,
                description: format!("Shipping cost - order #{}", order_ref),
                status: EntryStatus::Pending,
                hold_until,
                available_at: None,
            });
        }

        self.store.insert_ledger_entries(entries).await?;

        quota.sales_count += 1;
        if settlement.commission_free {
            quota.free_sales_used += 1;
        } else {
            quota.commission_paid_sales += 1;
            quota.total_commission_paid += settlement.commission_fee;
        }
        self.store.update_monthly_quota(quota).await?;

        info!(
            "Settlement recorded for seller {} order {}: net {} IQD (commission {})",
            seller_id, order_id, settlement.net_earnings, settlement.commission_fee
        );

        Ok(settlement)
    }

    /// Reverse every settlement entry belonging to an order.
    ///
    /// Entries not yet paid flip to `reversed` in place - the money never
    /// left, cancelling is enough and they stop counting anywhere. Entries
    /// already paid went out in a completed payout batch; those rows stay
    /// untouched and a compensating negative `reversal` entry is written,
    /// immediately available, so the amount comes off the seller's next
    /// payout instead.
    ///
    /// Reversal-kind entries are never themselves reversed, and an order
    /// that already carries compensations is not compensated again, so a
    /// repeated trigger (refusal after return, webhook redelivery) is a
    /// no-op rather than a compounding leak.
    pub async fn reverse_settlement(&self, order_id: Uuid, reason: &str) -> AppResult<()> {
        let (flipped, still_paid) = self.store.reverse_unpaid_entries(order_id).await?;
        if flipped > 0 {
            info!(
                "Reversed {} unpaid entries for order {}: {}",
                flipped, order_id, reason
            );
        }

        if still_paid.is_empty() {
            return Ok(());
        }

        let existing = self.store.entries_for_order(order_id).await?;
        if existing.iter().any(|e| e.kind == EntryKind::Reversal) {
            warn!(
                "Order {} already carries reversal entries, skipping duplicate compensation",
                order_id
            );
            return Ok(());
        }

        let now = Utc::now();
        let compensations: Vec<NewLedgerEntry> = still_paid
            .iter()
            .map(|entry| NewLedgerEntry {
                seller_id: entry.seller_id,
                order_id,
                kind: EntryKind::Reversal,
                amount: -entry.amount,
                description: format!("Reversal: {}", reason),
                status: EntryStatus::Available,
                hold_until: None,
                available_at: Some(now),
            })
            .collect();

        let count = compensations.len();
        self.store.insert_ledger_entries(compensations).await?;
        info!(
            "Wrote {} compensating reversal entries for paid-out order {}",
            count, order_id
        );

        Ok(())
    }

    /// Promote every pending entry whose hold expired to `available`.
    ///
    /// Safe to call repeatedly; an immediate second call moves zero rows.
    pub async fn process_hold_period_expiry(&self) -> AppResult<u64> {
        let released = self.store.release_held_entries(Utc::now()).await?;
        if released > 0 {
            info!("Released {} entries from hold", released);
        }
        Ok(released)
    }

    /// Aggregate a seller's wallet by entry status
    pub async fn get_wallet_balance(&self, seller_id: Uuid) -> AppResult<WalletBalance> {
        let entries = self.store.entries_for_seller(seller_id).await?;

        let mut pending = 0;
        let mut available = 0;
        let mut paid = 0;

        for entry in &entries {
            match entry.status {
                EntryStatus::Pending => pending += entry.amount,
                EntryStatus::Available => available += entry.amount,
                EntryStatus::Paid => paid += entry.amount,
                EntryStatus::Reversed => {}
            }
        }

        Ok(WalletBalance {
            pending,
            available,
            paid,
            total: pending + available,
        })
    }

    /// A seller's ledger history, newest first
    pub async fn wallet_entries(&self, seller_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        self.store.entries_for_seller(seller_id).await
    }

    /// The seller's quota row for the current calendar month
    pub async fn get_monthly_quota(&self, seller_id: Uuid) -> AppResult<MonthlyQuota> {
        self.current_month_quota(seller_id).await
    }

    async fn current_month_quota(&self, seller_id: Uuid) -> AppResult<MonthlyQuota> {
        let now = Utc::now();
        self.store
            .get_or_create_monthly_quota(seller_id, now.month() as i32, now.year())
            .await
    }
}

fn short_ref(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn engine(store: &Arc<MemoryStore>) -> LedgerEngine {
        let store: Arc<dyn MarketStore> = store.clone();
        LedgerEngine::new(store, LedgerConfig::default())
    }

    async fn set_free_sales_used(store: &MemoryStore, seller: Uuid, used: i32) {
        let now = Utc::now();
        let mut quota = store
            .get_or_create_monthly_quota(seller, now.month() as i32, now.year())
            .await
            .unwrap();
        quota.sales_count = used;
        quota.free_sales_used = used;
        store.update_monthly_quota(quota).await.unwrap();
    }

    #[tokio::test]
    async fn test_last_free_sale_then_commission_kicks_in() {
        let store = Arc::new(MemoryStore::new());
        let ledger = engine(&store);
        let seller = Uuid::new_v4();
        set_free_sales_used(&store, seller, 14).await;

        // 15th sale of the month is still free
        let settlement = ledger
            .create_sale_settlement(seller, Uuid::new_v4(), 100_000, 5_000)
            .await
            .unwrap();
        assert!(settlement.commission_free);
        assert_eq!(settlement.commission_fee, 0);
        assert_eq!(settlement.net_earnings, 95_000);

        let quota = ledger.get_monthly_quota(seller).await.unwrap();
        assert_eq!(quota.free_sales_used, 15);

        // 16th sale pays floor(100000 * 0.08)
        let settlement = ledger
            .create_sale_settlement(seller, Uuid::new_v4(), 100_000, 5_000)
            .await
            .unwrap();
        assert!(!settlement.commission_free);
        assert_eq!(settlement.commission_fee, 8_000);
        assert_eq!(settlement.net_earnings, 87_000);

        let quota = ledger.get_monthly_quota(seller).await.unwrap();
        assert_eq!(quota.free_sales_used, 15);
        assert_eq!(quota.commission_paid_sales, 1);
        assert_eq!(quota.total_commission_paid, 8_000);
        assert_eq!(quota.sales_count, 16);
    }

    #[tokio::test]
    async fn test_entry_group_shape() {
        let store = Arc::new(MemoryStore::new());
        let ledger = engine(&store);
        let seller = Uuid::new_v4();
        let order = Uuid::new_v4();

        // Free sale, with shipping: earning + shipping_deduction only
        ledger
            .create_sale_settlement(seller, order, 50_000, 3_000)
            .await
            .unwrap();

        let entries = store.entries_for_order(order).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Earning);
        assert_eq!(entries[0].amount, 50_000);
        assert_eq!(entries[1].kind, EntryKind::ShippingDeduction);
        assert_eq!(entries[1].amount, -3_000);
        assert!(entries.iter().all(|e| e.status == EntryStatus::Pending));
        assert!(entries.iter().all(|e| e.hold_until.is_some()));

        // Free sale, free shipping: a lone earning entry
        let order = Uuid::new_v4();
        ledger
            .create_sale_settlement(seller, order, 50_000, 0)
            .await
            .unwrap();
        assert_eq!(store.entries_for_order(order).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hold_expiry_releases_once() {
        let store = Arc::new(MemoryStore::new());
        let ledger = engine(&store);
        let seller = Uuid::new_v4();
        let order = Uuid::new_v4();

        // Entry whose hold already lapsed
        store
            .insert_ledger_entries(vec![NewLedgerEntry {
                seller_id: seller,
                order_id: order,
                kind: EntryKind::Earning,
                amount: 40_000,
                description: "Sale proceeds".to_string(),
                status: EntryStatus::Pending,
                hold_until: Some(Utc::now() - Duration::hours(1)),
                available_at: None,
            }])
            .await
            .unwrap();

        // And one still inside its hold window
        ledger
            .create_sale_settlement(seller, Uuid::new_v4(), 60_000, 0)
            .await
            .unwrap();

        assert_eq!(ledger.process_hold_period_expiry().await.unwrap(), 1);
        assert_eq!(ledger.process_hold_period_expiry().await.unwrap(), 0);

        let balance = ledger.get_wallet_balance(seller).await.unwrap();
        assert_eq!(balance.available, 40_000);
        assert_eq!(balance.pending, 60_000);
        assert_eq!(balance.total, 100_000);
    }

    #[tokio::test]
    async fn test_reverse_unpaid_entries_flip_in_place() {
        let store = Arc::new(MemoryStore::new());
        let ledger = engine(&store);
        let seller = Uuid::new_v4();
        let order = Uuid::new_v4();
        set_free_sales_used(&store, seller, 15).await;

        ledger
            .create_sale_settlement(seller, order, 100_000, 5_000)
            .await
            .unwrap();

        ledger.reverse_settlement(order, "returned").await.unwrap();

        let entries = store.entries_for_order(order).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.status == EntryStatus::Reversed));

        // Reversed rows contribute to no bucket
        let balance = ledger.get_wallet_balance(seller).await.unwrap();
        assert_eq!(
            balance,
            WalletBalance {
                pending: 0,
                available: 0,
                paid: 0,
                total: 0
            }
        );
    }

    #[tokio::test]
    async fn test_reverse_paid_entries_appends_compensation() {
        let store = Arc::new(MemoryStore::new());
        let ledger = engine(&store);
        let seller = Uuid::new_v4();
        let order = Uuid::new_v4();

        store
            .insert_ledger_entries(vec![
                NewLedgerEntry {
                    seller_id: seller,
                    order_id: order,
                    kind: EntryKind::Earning,
                    amount: 100_000,
                    description: "Sale proceeds".to_string(),
                    status: EntryStatus::Paid,
                    hold_until: None,
                    available_at: Some(Utc::now() - Duration::days(3)),
                },
                NewLedgerEntry {
                    seller_id: seller,
                    order_id: order,
                    kind: EntryKind::Commission,
                    amount: -8_000,
                    description: "Commission".to_string(),
                    status: EntryStatus::Paid,
                    hold_until: None,
                    available_at: Some(Utc::now() - Duration::days(3)),
                },
            ])
            .await
            .unwrap();

        ledger.reverse_settlement(order, "returned").await.unwrap();

        let entries = store.entries_for_order(order).await.unwrap();
        assert_eq!(entries.len(), 4);

        // Paid rows stay paid; the deduction lands on the next payout
        let reversals: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Reversal)
            .collect();
        assert_eq!(reversals.len(), 2);
        assert!(reversals
            .iter()
            .all(|e| e.status == EntryStatus::Available && e.available_at.is_some()));
        assert_eq!(reversals.iter().map(|e| e.amount).sum::<i64>(), -92_000);

        // The order's net contribution across live buckets is zero
        let balance = ledger.get_wallet_balance(seller).await.unwrap();
        assert_eq!(balance.paid + balance.available, 0);

        // A second trigger must not double the compensation
        ledger.reverse_settlement(order, "returned").await.unwrap();
        assert_eq!(store.entries_for_order(order).await.unwrap().len(), 4);
    }
}
