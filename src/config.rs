use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub courier_api_url: String,
    pub courier_api_key: String,
    /// Shared secret the courier sends back on webhook calls
    pub courier_webhook_secret: String,
    pub push_api_url: Option<String>,
    pub push_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/mazad".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            courier_api_url: std::env::var("COURIER_API_URL")
                .unwrap_or_else(|_| "https://api.courier.example".to_string()),
            courier_api_key: std::env::var("COURIER_API_KEY").unwrap_or_default(),
            courier_webhook_secret: std::env::var("COURIER_WEBHOOK_SECRET").unwrap_or_default(),
            push_api_url: std::env::var("PUSH_API_URL").ok(),
            push_api_key: std::env::var("PUSH_API_KEY").ok(),
        })
    }
}
