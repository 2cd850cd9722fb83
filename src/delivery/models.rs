use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Courier-driven delivery status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Returned,
    CustomerRefused,
    Cancelled,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Returned => "returned",
            DeliveryStatus::CustomerRefused => "customer_refused",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered
                | DeliveryStatus::Returned
                | DeliveryStatus::CustomerRefused
                | DeliveryStatus::Cancelled
        )
    }
}

/// Delivery order handed to the courier; one active shipment per order.
///
/// A rescheduled delivery books a fresh shipment, so an order can
/// accumulate several rows over its life - the latest one is current.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Courier-side shipment id, the key webhook events carry
    pub external_id: String,
    pub tracking_number: String,
    pub status: DeliveryStatus,
    /// Cash-on-delivery amount the courier collects from the buyer
    pub cod_amount: i64,
    pub shipping_cost: i64,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub cash_collected: bool,
    pub cash_collected_at: Option<DateTime<Utc>>,
    /// At-most-once guard: set when this shipment triggered a settlement
    pub settlement_recorded: bool,
    pub return_reason: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryOrder {
    pub order_id: Uuid,
    pub external_id: String,
    pub tracking_number: String,
    pub cod_amount: i64,
    pub shipping_cost: i64,
}

/// Typed courier webhook event.
///
/// The wire payload is validated and authenticated by the webhook layer;
/// the core only ever sees this struct. Driver-reported no-shows are
/// normalised by the validator into `status_message = "no_answer"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierEvent {
    pub delivery_id: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub driver_phone: Option<String>,
    #[serde(default)]
    pub driver_notes: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub cash_collected: bool,
    #[serde(default)]
    pub return_reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl CourierEvent {
    /// Driver could not reach the buyer - a sub-reason, not a terminal
    /// courier status. Opens the reschedule window instead of cancelling.
    pub fn is_no_answer(&self) -> bool {
        !self.status.is_terminal()
            && self
                .status_message
                .as_deref()
                .map(|m| m == "no_answer")
                .unwrap_or(false)
    }
}

/// Shipment booking request sent to the courier API
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentRequest {
    pub order_id: Uuid,
    pub item_description: String,
    pub cod_amount: i64,
    pub shipping_cost: i64,
}

/// Courier's answer to a booking
#[derive(Debug, Clone, Deserialize)]
pub struct ShipmentBooking {
    pub external_id: String,
    pub tracking_number: String,
}
