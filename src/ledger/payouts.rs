use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, PayoutError};
use crate::ledger::models::{
    EntryKind, NewPayout, Payout, SellerPayoutSummary,
};
use crate::storage::MarketStore;

/// Weekly aggregation of settled funds into payable batches.
///
/// Works purely over `available` entries; the append-only ledger plus the
/// status-filtered flip in the store make batching idempotent - a week
/// already swept has nothing left to double-count.
pub struct PayoutBatcher {
    store: Arc<dyn MarketStore>,
}

impl PayoutBatcher {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Aggregate available entries with available_at inside
    /// [week_start, week_start + 7d), grouped by seller
    pub async fn generate_weekly_payout_report(
        &self,
        week_start: DateTime<Utc>,
    ) -> AppResult<Vec<SellerPayoutSummary>> {
        let week_end = week_start + Duration::days(7);
        let entries = self
            .store
            .available_entries_in_window(week_start, week_end)
            .await?;

        let mut summaries: HashMap<Uuid, SellerPayoutSummary> = HashMap::new();

        for entry in &entries {
            let summary = summaries
                .entry(entry.seller_id)
                .or_insert_with(|| SellerPayoutSummary {
                    seller_id: entry.seller_id,
                    total_earnings: 0,
                    total_commission: 0,
                    total_shipping: 0,
                    total_returns: 0,
                    net_payout: 0,
                    transaction_count: 0,
                });

            match entry.kind {
                EntryKind::Earning => {
                    summary.total_earnings += entry.amount;
                    summary.transaction_count += 1;
                }
                EntryKind::Commission => summary.total_commission += entry.amount.abs(),
                EntryKind::ShippingDeduction => summary.total_shipping += entry.amount.abs(),
                EntryKind::Reversal => summary.total_returns += entry.amount.abs(),
            }
        }

        let mut summaries: Vec<SellerPayoutSummary> = summaries.into_values().collect();
        for summary in &mut summaries {
            summary.net_payout = summary.total_earnings
                - summary.total_commission
                - summary.total_shipping
                - summary.total_returns;
        }
        summaries.sort_by_key(|s| s.seller_id);

        Ok(summaries)
    }

    /// Insert the payout row and flip every matching available entry to
    /// `paid` in the same operation. Flipped rows are permanent history;
    /// corrections only ever arrive as new reversal entries.
    pub async fn create_weekly_payout(
        &self,
        seller_id: Uuid,
        week_start: DateTime<Utc>,
        summary: &SellerPayoutSummary,
    ) -> AppResult<Payout> {
        let week_end = week_start + Duration::days(7);

        let (payout, flipped) = self
            .store
            .create_weekly_payout(NewPayout {
                seller_id,
                week_start,
                week_end,
                total_earnings: summary.total_earnings,
                total_commission: summary.total_commission,
                total_shipping: summary.total_shipping,
                total_returns: summary.total_returns,
                net_payout: summary.net_payout,
            })
            .await?;

        info!(
            "Weekly payout {} created for seller {}: net {} IQD over {} entries",
            payout.id, seller_id, payout.net_payout, flipped
        );

        Ok(payout)
    }

    /// Record the out-of-band money transfer. Pure status/metadata update,
    /// no ledger side effects.
    pub async fn mark_payout_as_paid(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        method: String,
        reference: Option<String>,
    ) -> AppResult<Payout> {
        self.store
            .get_payout(payout_id)
            .await?
            .ok_or(PayoutError::PayoutNotFound(payout_id))?;

        let applied = self
            .store
            .mark_payout_paid(payout_id, admin_id, method, reference)
            .await?;
        if !applied {
            return Err(PayoutError::AlreadyPaid(payout_id).into());
        }

        let payout = self
            .store
            .get_payout(payout_id)
            .await?
            .ok_or(PayoutError::PayoutNotFound(payout_id))?;

        info!("Payout {} marked as paid by {}", payout_id, admin_id);
        Ok(payout)
    }

    pub async fn pending_payouts(&self) -> AppResult<Vec<Payout>> {
        self.store.pending_payouts().await
    }

    pub async fn seller_payouts(&self, seller_id: Uuid) -> AppResult<Vec<Payout>> {
        self.store.payouts_for_seller(seller_id).await
    }

    /// The upcoming payout day: next Sunday at 00:00 UTC
    pub fn next_payout_date(now: DateTime<Utc>) -> DateTime<Utc> {
        let days_ahead = match now.weekday().num_days_from_sunday() {
            0 => 7,
            n => 7 - n as i64,
        };
        let next = (now + Duration::days(days_ahead))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Utc.from_utc_datetime(&next)
    }
}
