use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult, DeliveryError};
use crate::ledger::LedgerEngine;
use crate::marketplace::models::OrderStatus;
use crate::storage::MarketStore;

/// Entry point for the return-approval flow.
///
/// The approval heuristics themselves (templates, scoring, auto-approval)
/// live outside the core; by the time this runs, the return is approved.
/// The order transition commits first, then the ledger reversal - both are
/// authoritative, neither is best-effort.
pub struct ReturnReversalHandler {
    store: Arc<dyn MarketStore>,
    ledger: Arc<LedgerEngine>,
}

impl ReturnReversalHandler {
    pub fn new(store: Arc<dyn MarketStore>, ledger: Arc<LedgerEngine>) -> Self {
        Self { store, ledger }
    }

    pub async fn approve_return(&self, order_id: Uuid, reason: &str) -> AppResult<()> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        OrderStatus::validate_transition(order.status, OrderStatus::Returned)?;

        let applied = self
            .store
            .set_order_status(
                order.id,
                order.status,
                OrderStatus::Returned,
                Some(reason.to_string()),
            )
            .await?;
        if !applied {
            let current = self
                .store
                .get_order(order_id)
                .await?
                .map(|o| o.status)
                .unwrap_or(order.status);
            return Err(DeliveryError::InvalidOrderTransition {
                from: current,
                to: OrderStatus::Returned,
            }
            .into());
        }

        self.ledger.reverse_settlement(order_id, reason).await?;

        info!("Return approved for order {}: {}", order_id, reason);
        Ok(())
    }
}
