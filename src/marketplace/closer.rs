use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::marketplace::models::{AuctionResult, Listing, NewOrder, OrderStatus};
use crate::notify::broadcast::{AuctionEvent, AuctionFeedBroadcaster, AuctionOutcome};
use crate::notify::{NotificationKind, Notifier};
use crate::storage::MarketStore;

/// Closing cadence configuration
#[derive(Debug, Clone)]
pub struct CloserConfig {
    /// How often the closer scans for ended auctions
    pub interval: std::time::Duration,
    /// Tolerance after the nominal end time before a listing is eligible,
    /// absorbing last-moment bids and clock skew
    pub grace_period: chrono::Duration,
    /// Delay before the first scan after startup
    pub startup_delay: std::time::Duration,
}

impl Default for CloserConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(30),
            grace_period: chrono::Duration::seconds(5),
            startup_delay: std::time::Duration::from_secs(5),
        }
    }
}

/// Observable scheduler state snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CloserStatus {
    pub is_processing: bool,
    pub interval_secs: u64,
    pub grace_period_secs: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Periodic job that finalizes expired auctions into orders.
///
/// Single-flight: when a cycle is still running as the timer fires, that
/// tick is skipped entirely - no queueing, no overlap. Missed ticks are
/// acceptable; the next tick picks up whatever is still expired.
pub struct AuctionCloser {
    store: Arc<dyn MarketStore>,
    notifier: Arc<Notifier>,
    feed: Arc<AuctionFeedBroadcaster>,
    config: CloserConfig,
    is_processing: AtomicBool,
    last_run_at: RwLock<Option<DateTime<Utc>>>,
}

impl AuctionCloser {
    pub fn new(
        store: Arc<dyn MarketStore>,
        notifier: Arc<Notifier>,
        feed: Arc<AuctionFeedBroadcaster>,
        config: CloserConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            feed,
            config,
            is_processing: AtomicBool::new(false),
            last_run_at: RwLock::new(None),
        }
    }

    /// Start the closing loop (runs in background)
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let closer = Arc::clone(self);
        info!(
            "Starting auction closer, checking every {}s",
            closer.config.interval.as_secs()
        );

        tokio::spawn(async move {
            tokio::time::sleep(closer.config.startup_delay).await;
            let mut ticker = interval(closer.config.interval);
            loop {
                ticker.tick().await;
                closer.process_all_ended_auctions().await;
            }
        })
    }

    pub fn status(&self) -> CloserStatus {
        CloserStatus {
            is_processing: self.is_processing.load(Ordering::SeqCst),
            interval_secs: self.config.interval.as_secs(),
            grace_period_secs: self.config.grace_period.num_seconds(),
            last_run_at: *self.last_run_at.read(),
        }
    }

    /// Run one closing cycle over every eligible listing.
    ///
    /// Listings are processed independently: a failure on one is recorded
    /// in its result and never blocks the rest of the batch.
    pub async fn process_all_ended_auctions(&self) -> Vec<AuctionResult> {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Auction closer is already running, skipping this cycle");
            return Vec::new();
        }

        let results = self.run_cycle().await;
        *self.last_run_at.write() = Some(Utc::now());
        self.is_processing.store(false, Ordering::SeqCst);
        results
    }

    async fn run_cycle(&self) -> Vec<AuctionResult> {
        let cutoff = Utc::now() - self.config.grace_period;

        let ended = match self.store.expired_active_auctions(cutoff).await {
            Ok(listings) => listings,
            Err(e) => {
                error!("Failed to scan for ended auctions: {}", e);
                return Vec::new();
            }
        };

        if ended.is_empty() {
            return Vec::new();
        }

        info!("Found {} ended auctions to process", ended.len());

        let mut results = Vec::with_capacity(ended.len());
        for listing in ended {
            let result = match self.process_ended_auction(&listing).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error processing auction {}: {}", listing.id, e);
                    AuctionResult {
                        listing_id: listing.id,
                        listing_title: listing.title.clone(),
                        seller_id: listing.seller_id,
                        winner_id: None,
                        winning_bid: None,
                        total_bids: 0,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let successful = results.iter().filter(|r| r.success).count();
        info!(
            "Processed {} auctions: {} successful, {} failed",
            results.len(),
            successful,
            results.len() - successful
        );

        results
    }

    async fn process_ended_auction(&self, listing: &Listing) -> AppResult<AuctionResult> {
        let bids = self.store.bids_for_listing(listing.id).await?;

        if bids.is_empty() {
            self.store.close_listing(listing.id, None).await?;

            self.notifier
                .notify(
                    listing.seller_id,
                    NotificationKind::AuctionEndedNoBids {
                        listing_title: listing.title.clone(),
                    },
                    Some(listing.id),
                )
                .await;

            self.feed.broadcast_auction_end(AuctionEvent::AuctionEnded {
                listing_id: listing.id,
                outcome: AuctionOutcome::NoBids,
                winner_id: None,
                winning_bid: None,
            });

            info!("Auction {} ended with no bids", listing.id);
            return Ok(AuctionResult {
                listing_id: listing.id,
                listing_title: listing.title.clone(),
                seller_id: listing.seller_id,
                winner_id: None,
                winning_bid: None,
                total_bids: 0,
                success: true,
                error: None,
            });
        }

        // Bids arrive sorted highest first, earliest first on equal
        // amounts, so the winner tie-break is deterministic
        let winning_bid = &bids[0];
        let winner = self
            .store
            .get_user(winning_bid.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Winner user {}", winning_bid.user_id)))?;

        self.store
            .close_listing(listing.id, Some(winning_bid.amount))
            .await?;

        let order = self
            .store
            .create_order(NewOrder {
                listing_id: listing.id,
                buyer_id: winner.id,
                seller_id: listing.seller_id,
                amount: winning_bid.amount,
                status: OrderStatus::Processing,
                delivery_address_id: Some(winning_bid.shipping_address_id),
            })
            .await?;

        self.notifier
            .notify(
                winner.id,
                NotificationKind::AuctionWon {
                    listing_title: listing.title.clone(),
                    amount: winning_bid.amount,
                },
                Some(listing.id),
            )
            .await;
        self.notifier
            .notify(
                listing.seller_id,
                NotificationKind::AuctionSold {
                    listing_title: listing.title.clone(),
                    amount: winning_bid.amount,
                },
                Some(listing.id),
            )
            .await;

        // Every distinct losing bidder hears exactly once, however many
        // bids they placed
        let mut notified: HashSet<_> = HashSet::new();
        for bid in bids.iter().skip(1) {
            if bid.user_id != winner.id && notified.insert(bid.user_id) {
                self.notifier
                    .notify(
                        bid.user_id,
                        NotificationKind::AuctionLost {
                            listing_title: listing.title.clone(),
                            winning_bid: winning_bid.amount,
                        },
                        Some(listing.id),
                    )
                    .await;
            }
        }

        self.feed.broadcast_auction_end(AuctionEvent::AuctionEnded {
            listing_id: listing.id,
            outcome: AuctionOutcome::Sold,
            winner_id: Some(winner.id),
            winning_bid: Some(winning_bid.amount),
        });

        info!(
            "Auction {} ended - winner {}, amount {}, order {}",
            listing.id, winner.id, winning_bid.amount, order.id
        );

        Ok(AuctionResult {
            listing_id: listing.id,
            listing_title: listing.title.clone(),
            seller_id: listing.seller_id,
            winner_id: Some(winner.id),
            winning_bid: Some(winning_bid.amount),
            total_bids: bids.len(),
            success: true,
            error: None,
        })
    }
}
