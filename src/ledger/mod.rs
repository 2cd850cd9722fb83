pub mod engine;
pub mod models;
pub mod payouts;

pub use engine::{LedgerConfig, LedgerEngine};
pub use payouts::PayoutBatcher;
