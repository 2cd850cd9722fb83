pub mod bids;
pub mod closer;
pub mod models;

pub use bids::{BidConfig, BidProcessor};
pub use closer::{AuctionCloser, CloserConfig};
