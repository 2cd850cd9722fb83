use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Realtime auction event pushed to listing subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    BidPlaced {
        listing_id: Uuid,
        current_bid: i64,
        total_bids: i32,
        bidder_id: Uuid,
        auction_end_time: Option<DateTime<Utc>>,
        time_extended: bool,
    },
    AuctionEnded {
        listing_id: Uuid,
        outcome: AuctionOutcome,
        winner_id: Option<Uuid>,
        winning_bid: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionOutcome {
    Sold,
    NoBids,
}

/// Broadcast channel capacity
const BROADCAST_CAPACITY: usize = 1000;

/// Auction event broadcaster.
///
/// One global channel; events carry the listing id and the transport layer
/// filters per subscription. Sends to a channel with no receivers are
/// silently dropped - broadcasting is always fire-and-forget.
pub struct AuctionFeedBroadcaster {
    event_tx: broadcast::Sender<AuctionEvent>,
}

impl AuctionFeedBroadcaster {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { event_tx }
    }

    /// Broadcast a bid update to all subscribers
    pub fn broadcast_bid(&self, event: AuctionEvent) {
        let _ = self.event_tx.send(event.clone());
        if let AuctionEvent::BidPlaced {
            listing_id,
            current_bid,
            ..
        } = event
        {
            debug!("Broadcast bid: {} = {}", listing_id, current_bid);
        }
    }

    /// Broadcast an auction resolution to all subscribers
    pub fn broadcast_auction_end(&self, event: AuctionEvent) {
        let _ = self.event_tx.send(event.clone());
        if let AuctionEvent::AuctionEnded {
            listing_id,
            outcome,
            ..
        } = event
        {
            debug!("Broadcast auction end: {} {:?}", listing_id, outcome);
        }
    }

    /// Subscribe to the auction event feed
    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.event_tx.subscribe()
    }

    /// Get number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for AuctionFeedBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bid_broadcast() {
        let broadcaster = AuctionFeedBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let listing_id = Uuid::new_v4();
        broadcaster.broadcast_bid(AuctionEvent::BidPlaced {
            listing_id,
            current_bid: 7_000,
            total_bids: 3,
            bidder_id: Uuid::new_v4(),
            auction_end_time: Some(Utc::now()),
            time_extended: false,
        });

        match rx.recv().await.unwrap() {
            AuctionEvent::BidPlaced {
                listing_id: id,
                current_bid,
                ..
            } => {
                assert_eq!(id, listing_id);
                assert_eq!(current_bid, 7_000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_silent() {
        let broadcaster = AuctionFeedBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);

        // Must not panic or error with nobody listening
        broadcaster.broadcast_auction_end(AuctionEvent::AuctionEnded {
            listing_id: Uuid::new_v4(),
            outcome: AuctionOutcome::NoBids,
            winner_id: None,
            winning_bid: None,
        });
    }
}
