pub mod broadcast;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::storage::MarketStore;

/// Persisted in-app notification row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<Uuid>,
}

/// The fixed catalogue of notifications this core emits
#[derive(Debug, Clone)]
pub enum NotificationKind {
    Outbid {
        listing_title: String,
    },
    NewBid {
        listing_title: String,
        amount: i64,
    },
    AuctionWon {
        listing_title: String,
        amount: i64,
    },
    AuctionSold {
        listing_title: String,
        amount: i64,
    },
    AuctionLost {
        listing_title: String,
        winning_bid: i64,
    },
    AuctionEndedNoBids {
        listing_title: String,
    },
    OrderCancelledNoAnswer,
    DeliveryRescheduled,
}

impl NotificationKind {
    pub fn kind_str(&self) -> &'static str {
        match self {
            NotificationKind::Outbid { .. } => "outbid",
            NotificationKind::NewBid { .. } => "new_bid",
            NotificationKind::AuctionWon { .. } => "auction_won",
            NotificationKind::AuctionSold { .. } => "auction_sold",
            NotificationKind::AuctionLost { .. } => "auction_lost",
            NotificationKind::AuctionEndedNoBids { .. } => "auction_ended_no_bids",
            NotificationKind::OrderCancelledNoAnswer => "order_cancelled_no_answer",
            NotificationKind::DeliveryRescheduled => "delivery_rescheduled",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationKind::Outbid { .. } => "You have been outbid!",
            NotificationKind::NewBid { .. } => "New bid!",
            NotificationKind::AuctionWon { .. } => "Congratulations, you won the auction!",
            NotificationKind::AuctionSold { .. } => "Your item sold at auction",
            NotificationKind::AuctionLost { .. } => "The auction has ended",
            NotificationKind::AuctionEndedNoBids { .. } => "Auction ended with no bids",
            NotificationKind::OrderCancelledNoAnswer => "Order cancelled",
            NotificationKind::DeliveryRescheduled => "Delivery rescheduled",
        }
    }

    pub fn message(&self) -> String {
        match self {
            NotificationKind::Outbid { listing_title } => format!(
                "A higher bid was placed on \"{}\". Raise your bid to win.",
                listing_title
            ),
            NotificationKind::NewBid {
                listing_title,
                amount,
            } => format!("A bid of {} IQD was placed on \"{}\"", amount, listing_title),
            NotificationKind::AuctionWon {
                listing_title,
                amount,
            } => format!(
                "You won the auction on \"{}\" at {} IQD. Please complete the order.",
                listing_title, amount
            ),
            NotificationKind::AuctionSold {
                listing_title,
                amount,
            } => format!("\"{}\" sold at auction for {} IQD", listing_title, amount),
            NotificationKind::AuctionLost {
                listing_title,
                winning_bid,
            } => format!(
                "The auction on \"{}\" ended without you winning. The winning bid was {} IQD.",
                listing_title, winning_bid
            ),
            NotificationKind::AuctionEndedNoBids { listing_title } => format!(
                "The auction on \"{}\" ended without any bids. You can relist the item.",
                listing_title
            ),
            NotificationKind::OrderCancelledNoAnswer => {
                "Your order was cancelled because the delivery could not reach you in time. \
                 Ordering is suspended for 7 days."
                    .to_string()
            }
            NotificationKind::DeliveryRescheduled => {
                "Your delivery has been rescheduled and a new shipment is on its way.".to_string()
            }
        }
    }
}

/// Push sender talking to the push gateway.
///
/// Best-effort by contract: callers never await delivery guarantees.
pub struct PushClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    user_id: Uuid,
    title: &'a str,
    body: &'a str,
}

impl PushClient {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            api_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub async fn send_push(&self, user_id: Uuid, title: &str, body: &str) -> AppResult<()> {
        let request = PushRequest {
            user_id,
            title,
            body,
        };

        let response = self
            .client
            .post(format!("{}/v1/push", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalError(format!(
                "Push gateway error: {}",
                error_text
            )));
        }

        Ok(())
    }
}

/// Fire-and-forget notification sender.
///
/// Persists the in-app row and attempts a push; failures are logged and
/// never surface to the caller, so a dead notification pipe can never roll
/// back the state change it is attached to.
pub struct Notifier {
    store: Arc<dyn MarketStore>,
    push: Option<Arc<PushClient>>,
}

impl Notifier {
    pub fn new(store: Arc<dyn MarketStore>, push: Option<Arc<PushClient>>) -> Self {
        Self { store, push }
    }

    pub async fn notify(&self, user_id: Uuid, kind: NotificationKind, related_id: Option<Uuid>) {
        let title = kind.title().to_string();
        let message = kind.message();

        let result = self
            .store
            .create_notification(NewNotification {
                user_id,
                kind: kind.kind_str().to_string(),
                title: title.clone(),
                message: message.clone(),
                related_id,
            })
            .await;

        if let Err(e) = result {
            warn!("Failed to persist {} notification for {}: {}", kind.kind_str(), user_id, e);
        }

        if let Some(push) = &self.push {
            let push = push.clone();
            tokio::spawn(async move {
                if let Err(e) = push.send_push(user_id, &title, &message).await {
                    debug!("Push delivery failed for {}: {}", user_id, e);
                }
            });
        }
    }
}
