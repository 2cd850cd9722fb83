use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::error::SettlementError;

/// Ledger entry kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "entry_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Earning,
    Commission,
    ShippingDeduction,
    Reversal,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Earning => "earning",
            EntryKind::Commission => "commission",
            EntryKind::ShippingDeduction => "shipping_deduction",
            EntryKind::Reversal => "reversal",
        }
    }
}

/// Ledger entry status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "entry_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Available,
    Paid,
    Reversed,
}

impl EntryStatus {
    /// Validate ledger entry state machine transitions.
    ///
    /// Valid transitions:
    /// - pending -> available (hold expiry), reversed
    /// - available -> paid (payout batch), reversed
    /// - paid and reversed are terminal; paid rows are permanent history
    pub fn validate_transition(from: EntryStatus, to: EntryStatus) -> Result<(), SettlementError> {
        let allowed: &[EntryStatus] = match from {
            EntryStatus::Pending => &[EntryStatus::Available, EntryStatus::Reversed],
            EntryStatus::Available => &[EntryStatus::Paid, EntryStatus::Reversed],
            EntryStatus::Paid | EntryStatus::Reversed => &[],
        };

        if allowed.contains(&to) {
            Ok(())
        } else {
            Err(SettlementError::InvalidTransition { from, to })
        }
    }
}

/// Signed settlement ledger entry, append-only.
///
/// Existing rows are never deleted; rows that reached `paid` are never
/// mutated again and can only be corrected by a new `reversal` entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub order_id: Uuid,
    pub kind: EntryKind,
    /// Signed amount in IQD: earnings positive, deductions negative
    pub amount: i64,
    pub description: String,
    pub status: EntryStatus,
    pub hold_until: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub payout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub seller_id: Uuid,
    pub order_id: Uuid,
    pub kind: EntryKind,
    pub amount: i64,
    pub description: String,
    pub status: EntryStatus,
    pub hold_until: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
}

/// Per-seller, per-calendar-month commission tracking
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonthlyQuota {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub sales_count: i32,
    pub free_sales_used: i32,
    pub commission_paid_sales: i32,
    pub total_commission_paid: i64,
}

/// Outcome of one settlement computation
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub gross_earnings: i64,
    pub commission_fee: i64,
    pub shipping_deduction: i64,
    pub net_earnings: i64,
    pub commission_free: bool,
    pub free_sales_remaining: i32,
}

/// Wallet balance aggregated by entry status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletBalance {
    pub pending: i64,
    pub available: i64,
    pub paid: i64,
    /// Funds not yet disbursed: pending + available
    pub total: i64,
}

/// Payout status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payout_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Paid,
}

/// Weekly payout batch for one seller
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payout {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub total_earnings: i64,
    pub total_commission: i64,
    pub total_shipping: i64,
    pub total_returns: i64,
    pub net_payout: i64,
    pub status: PayoutStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<Uuid>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayout {
    pub seller_id: Uuid,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub total_earnings: i64,
    pub total_commission: i64,
    pub total_shipping: i64,
    pub total_returns: i64,
    pub net_payout: i64,
}

/// Per-seller aggregation over one payout week
#[derive(Debug, Clone, Serialize)]
pub struct SellerPayoutSummary {
    pub seller_id: Uuid,
    pub total_earnings: i64,
    pub total_commission: i64,
    pub total_shipping: i64,
    pub total_returns: i64,
    pub net_payout: i64,
    pub transaction_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_transition_table() {
        use EntryStatus::*;

        assert!(EntryStatus::validate_transition(Pending, Available).is_ok());
        assert!(EntryStatus::validate_transition(Pending, Reversed).is_ok());
        assert!(EntryStatus::validate_transition(Available, Paid).is_ok());
        assert!(EntryStatus::validate_transition(Available, Reversed).is_ok());

        // Pending can never jump straight to paid
        assert!(EntryStatus::validate_transition(Pending, Paid).is_err());

        // Paid rows are permanent history
        assert!(EntryStatus::validate_transition(Paid, Reversed).is_err());
        assert!(EntryStatus::validate_transition(Paid, Available).is_err());
        assert!(EntryStatus::validate_transition(Reversed, Available).is_err());
    }
}
