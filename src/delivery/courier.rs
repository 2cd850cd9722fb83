use async_trait::async_trait;

use crate::delivery::models::{ShipmentBooking, ShipmentRequest};
use crate::error::{AppError, AppResult};

/// Outbound courier API boundary. The core only ever books shipments;
/// everything else arrives back through webhooks.
#[async_trait]
pub trait CourierApi: Send + Sync {
    async fn create_shipment(&self, request: ShipmentRequest) -> AppResult<ShipmentBooking>;
}

/// HTTP client for the courier's shipment API
pub struct HttpCourierClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpCourierClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CourierApi for HttpCourierClient {
    async fn create_shipment(&self, request: ShipmentRequest) -> AppResult<ShipmentBooking> {
        let response = self
            .client
            .post(format!("{}/v1/shipments", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalError(format!(
                "Courier API error: {}",
                error_text
            )));
        }

        let booking: ShipmentBooking = response.json().await?;
        Ok(booking)
    }
}
