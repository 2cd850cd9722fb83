pub mod courier;
pub mod models;
pub mod returns;
pub mod service;

pub use courier::{CourierApi, HttpCourierClient};
pub use returns::ReturnReversalHandler;
pub use service::{DeliveryConfig, DeliveryService};
