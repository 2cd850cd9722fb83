use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, BidError};
use crate::marketplace::models::{Bid, NewBid, SaleType};
use crate::notify::broadcast::{AuctionEvent, AuctionFeedBroadcaster};
use crate::notify::{NotificationKind, Notifier};
use crate::storage::MarketStore;

/// Bid acceptance configuration
#[derive(Debug, Clone)]
pub struct BidConfig {
    /// Fixed increment every bid must clear over the current one, in IQD
    pub bid_increment: i64,
    /// Anti-sniping window: a bid landing inside it slides the deadline
    pub anti_snipe_window: Duration,
}

impl Default for BidConfig {
    fn default() -> Self {
        Self {
            bid_increment: 1_000,
            anti_snipe_window: Duration::minutes(2),
        }
    }
}

/// Validates and records a single bid against a listing.
///
/// All preconditions are checked before any write; a rejected bid mutates
/// nothing. Acceptance itself is serialized through the store's
/// compare-and-set, so two bids racing against the same snapshot cannot
/// both land.
pub struct BidProcessor {
    store: Arc<dyn MarketStore>,
    notifier: Arc<Notifier>,
    feed: Arc<AuctionFeedBroadcaster>,
    config: BidConfig,
}

impl BidProcessor {
    pub fn new(
        store: Arc<dyn MarketStore>,
        notifier: Arc<Notifier>,
        feed: Arc<AuctionFeedBroadcaster>,
        config: BidConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            feed,
            config,
        }
    }

    pub async fn place_bid(
        &self,
        listing_id: Uuid,
        user_id: Uuid,
        amount: i64,
        shipping_address_id: Uuid,
    ) -> AppResult<Bid> {
        let now = Utc::now();

        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(BidError::ListingNotFound(listing_id))?;

        if listing.sale_type != SaleType::Auction {
            return Err(BidError::NotAnAuction.into());
        }
        if !listing.is_active {
            return Err(BidError::ListingInactive.into());
        }
        let end_time = listing.auction_end_time.ok_or(BidError::NotAnAuction)?;
        if now > end_time {
            return Err(BidError::AuctionEnded.into());
        }

        let bidder = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(BidError::BidderNotFound(user_id))?;

        if !bidder.phone_verified {
            return Err(BidError::PhoneNotVerified.into());
        }
        if bidder.is_banned {
            return Err(BidError::BidderBanned.into());
        }
        if listing.seller_id == user_id {
            return Err(BidError::OwnListing.into());
        }
        if listing.highest_bidder_id == Some(user_id) {
            return Err(BidError::AlreadyHighestBidder.into());
        }

        let minimum = listing.minimum_next_bid(self.config.bid_increment);
        if amount < minimum {
            return Err(BidError::BelowMinimum {
                minimum,
                offered: amount,
            }
            .into());
        }

        let exposure = self.store.winning_bid_exposure(user_id).await?;
        if exposure + amount > bidder.bidding_limit {
            return Err(BidError::LimitExceeded {
                limit: bidder.bidding_limit,
                active: exposure,
                attempted: amount,
            }
            .into());
        }

        // The authoritative write: CAS against the snapshot validated above
        let bid = self
            .store
            .try_apply_bid(
                listing.current_bid,
                NewBid {
                    listing_id,
                    user_id,
                    amount,
                    shipping_address_id,
                },
            )
            .await?
            .ok_or(BidError::ConcurrentBid)?;

        info!(
            "Bid accepted: {} IQD on listing {} by {}",
            amount, listing_id, user_id
        );

        // Side effects run after the commit and never undo it
        if let Some(previous) = listing.highest_bidder_id {
            self.notifier
                .notify(
                    previous,
                    NotificationKind::Outbid {
                        listing_title: listing.title.clone(),
                    },
                    Some(listing.id),
                )
                .await;
        }
        self.notifier
            .notify(
                listing.seller_id,
                NotificationKind::NewBid {
                    listing_title: listing.title.clone(),
                    amount,
                },
                Some(listing.id),
            )
            .await;

        // Anti-sniping: a bid inside the window slides the deadline to
        // now + window; every later bid inside the new window slides it
        // again
        let mut end_time = end_time;
        let mut time_extended = false;
        let remaining = end_time - now;
        if remaining > Duration::zero() && remaining <= self.config.anti_snipe_window {
            let new_end = now + self.config.anti_snipe_window;
            if self.store.extend_auction_end(listing.id, new_end).await? {
                info!(
                    "Anti-sniping: listing {} deadline extended to {}",
                    listing.id, new_end
                );
                end_time = new_end;
                time_extended = true;
            }
        }

        self.feed.broadcast_bid(AuctionEvent::BidPlaced {
            listing_id,
            current_bid: amount,
            total_bids: listing.total_bids + 1,
            bidder_id: user_id,
            auction_end_time: Some(end_time),
            time_extended,
        });

        Ok(bid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::models::NewListing;
    use crate::marketplace::models::NewUser;
    use crate::storage::MemoryStore;

    fn processor(store: &Arc<MemoryStore>) -> BidProcessor {
        let store: Arc<dyn MarketStore> = store.clone();
        let notifier = Arc::new(Notifier::new(store.clone(), None));
        let feed = Arc::new(AuctionFeedBroadcaster::new());
        BidProcessor::new(store, notifier, feed, BidConfig::default())
    }

    async fn bidder(store: &MemoryStore, name: &str) -> Uuid {
        store
            .create_user(NewUser {
                display_name: name.to_string(),
                phone: "07700000000".to_string(),
                phone_verified: true,
                is_banned: false,
                bidding_limit: 100_000,
            })
            .await
            .unwrap()
            .id
    }

    async fn auction(store: &MemoryStore, seller: Uuid, price: i64, ends_in: Duration) -> Uuid {
        store
            .create_listing(NewListing {
                seller_id: seller,
                title: "Vintage camera".to_string(),
                sale_type: SaleType::Auction,
                price,
                shipping_cost: 5_000,
                auction_end_time: Some(Utc::now() + ends_in),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_accepted_bids_keep_current_bid_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let b = bidder(&store, "b").await;
        let listing = auction(&store, seller, 10_000, Duration::hours(1)).await;

        bids.place_bid(listing, a, 10_000, Uuid::new_v4()).await.unwrap();
        bids.place_bid(listing, b, 12_000, Uuid::new_v4()).await.unwrap();
        bids.place_bid(listing, a, 13_000, Uuid::new_v4()).await.unwrap();

        let listing = store.get_listing(listing).await.unwrap().unwrap();
        assert_eq!(listing.current_bid, Some(13_000));
        assert_eq!(listing.highest_bidder_id, Some(a));
        assert_eq!(listing.total_bids, 3);
    }

    #[tokio::test]
    async fn test_first_bid_must_reach_listing_price() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let listing = auction(&store, seller, 10_000, Duration::hours(1)).await;

        let err = bids
            .place_bid(listing, a, 9_999, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Bid(BidError::BelowMinimum { minimum: 10_000, .. })
        ));

        // Nothing moved
        let listing = store.get_listing(listing).await.unwrap().unwrap();
        assert_eq!(listing.current_bid, None);
        assert_eq!(listing.total_bids, 0);
        assert!(store.bids_for_listing(listing.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bid_must_clear_increment_over_current() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let b = bidder(&store, "b").await;
        let listing = auction(&store, seller, 10_000, Duration::hours(1)).await;

        bids.place_bid(listing, a, 10_000, Uuid::new_v4()).await.unwrap();

        let err = bids
            .place_bid(listing, b, 10_500, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Bid(BidError::BelowMinimum { minimum: 11_000, .. })
        ));

        let listing = store.get_listing(listing).await.unwrap().unwrap();
        assert_eq!(listing.current_bid, Some(10_000));
        assert_eq!(listing.total_bids, 1);
    }

    #[tokio::test]
    async fn test_rejects_seller_self_outbid_banned_and_unverified() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let listing = auction(&store, seller, 10_000, Duration::hours(1)).await;

        let err = bids
            .place_bid(listing, seller, 10_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Bid(BidError::OwnListing)));

        bids.place_bid(listing, a, 10_000, Uuid::new_v4()).await.unwrap();
        let err = bids
            .place_bid(listing, a, 11_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Bid(BidError::AlreadyHighestBidder)
        ));

        let banned = store
            .create_user(NewUser {
                display_name: "banned".to_string(),
                phone: "07700000001".to_string(),
                phone_verified: true,
                is_banned: true,
                bidding_limit: 100_000,
            })
            .await
            .unwrap();
        let err = bids
            .place_bid(listing, banned.id, 11_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Bid(BidError::BidderBanned)));

        let unverified = store
            .create_user(NewUser {
                display_name: "unverified".to_string(),
                phone: "07700000002".to_string(),
                phone_verified: false,
                is_banned: false,
                bidding_limit: 100_000,
            })
            .await
            .unwrap();
        let err = bids
            .place_bid(listing, unverified.id, 11_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Bid(BidError::PhoneNotVerified)
        ));

        // Only the one accepted bid exists
        assert_eq!(store.bids_for_listing(listing).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_expired_auction() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let listing = auction(&store, seller, 10_000, Duration::seconds(-30)).await;

        let err = bids
            .place_bid(listing, a, 10_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Bid(BidError::AuctionEnded)));
    }

    #[tokio::test]
    async fn test_bidding_limit_counts_winning_exposure() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let first = auction(&store, seller, 60_000, Duration::hours(1)).await;
        let second = auction(&store, seller, 30_000, Duration::hours(1)).await;

        // a now carries 60k of winning exposure against a 100k limit
        bids.place_bid(first, a, 60_000, Uuid::new_v4()).await.unwrap();

        let err = bids
            .place_bid(second, a, 50_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Bid(BidError::LimitExceeded {
                limit: 100_000,
                active: 60_000,
                attempted: 50_000,
            })
        ));

        bids.place_bid(second, a, 40_000, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_anti_sniping_slides_deadline_inside_window() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let listing = auction(&store, seller, 10_000, Duration::seconds(90)).await;

        let before = Utc::now();
        bids.place_bid(listing, a, 10_000, Uuid::new_v4()).await.unwrap();

        let end = store
            .get_listing(listing)
            .await
            .unwrap()
            .unwrap()
            .auction_end_time
            .unwrap();
        assert!(end >= before + Duration::seconds(119));
        assert!(end <= Utc::now() + Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_no_extension_outside_window() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let listing = auction(&store, seller, 10_000, Duration::minutes(10)).await;
        let original_end = store
            .get_listing(listing)
            .await
            .unwrap()
            .unwrap()
            .auction_end_time
            .unwrap();

        bids.place_bid(listing, a, 10_000, Uuid::new_v4()).await.unwrap();

        let end = store
            .get_listing(listing)
            .await
            .unwrap()
            .unwrap()
            .auction_end_time
            .unwrap();
        assert_eq!(end, original_end);
    }

    #[tokio::test]
    async fn test_outbid_and_seller_notifications() {
        let store = Arc::new(MemoryStore::new());
        let bids = processor(&store);
        let seller = bidder(&store, "seller").await;
        let a = bidder(&store, "a").await;
        let b = bidder(&store, "b").await;
        let listing = auction(&store, seller, 10_000, Duration::hours(1)).await;

        bids.place_bid(listing, a, 10_000, Uuid::new_v4()).await.unwrap();
        bids.place_bid(listing, b, 11_000, Uuid::new_v4()).await.unwrap();

        let to_a = store.notifications_for_user(a).await.unwrap();
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].kind, "outbid");

        let to_seller = store.notifications_for_user(seller).await.unwrap();
        assert_eq!(to_seller.len(), 2);
        assert!(to_seller.iter().all(|n| n.kind == "new_bid"));
    }
}
